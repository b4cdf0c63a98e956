pub mod post;

use crate::model::post::{InvalidImageError, InvalidPostTitleError};
use derive_where::derive_where;
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    PostTitle(#[from] InvalidPostTitleError),
    #[error(transparent)]
    Image(#[from] InvalidImageError),
}

#[derive_where(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<Marker>(Uuid, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid, PhantomData)
    }

    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    #[must_use]
    pub fn uuid(self) -> Uuid {
        self.0
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<Uuid> for Id<Marker> {
    fn from(value: Uuid) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for Uuid {
    fn from(value: Id<Marker>) -> Self {
        value.0
    }
}
