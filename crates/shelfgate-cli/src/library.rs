//! Registration, identification and circulation on top of the record store.

use crate::store::{PersonRecord, Store, StoreError};
use chrono::{DateTime, Utc};
use shelfgate_core::{
    CirculationError, Embedding, FaceIndex, IndexEntry, ItemCode, KioskSession, Outcome,
    SessionState,
};
use std::sync::Arc;
use thiserror::Error;

/// Everything an operator can be told went wrong.
#[derive(Error, Debug)]
pub enum KioskError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("this face is already registered")]
    DuplicateFace,
    #[error("name must not be empty")]
    EmptyName,
    #[error("name {0:?} is already registered")]
    NameTaken(String),
    #[error("invalid barcode {0:?} (8 digits only)")]
    InvalidItemCode(String),
    #[error("{name} must return {held} first")]
    MustReturnFirst { name: String, held: ItemCode },
    #[error("verify your face first")]
    NotVerified,
    #[error("session expired, verify your face again")]
    SessionExpired,
    #[error("verified person no longer exists")]
    UnknownPerson,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for KioskError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NameTaken(name) => Self::NameTaken(name),
            StoreError::UnknownPerson(_) => Self::UnknownPerson,
            StoreError::Circulation(CirculationError::InvalidItemCode(raw)) => Self::InvalidItemCode(raw),
            other => Self::Store(other),
        }
    }
}

pub struct Library {
    store: Store,
    index: Arc<FaceIndex>,
    tolerance: f64,
}

impl Library {
    /// Wrap `store`, building the face index from its rows once.
    pub fn new(store: Store, tolerance: f64) -> Result<Self, KioskError> {
        let index = store.face_index()?;
        tracing::info!(registered = index.len(), tolerance, "library ready");
        Ok(Self { store, index: Arc::new(index), tolerance })
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Shared snapshot of the face index for a scan.
    pub fn index(&self) -> Arc<FaceIndex> {
        Arc::clone(&self.index)
    }

    /// Register `name` with the captured face. `face` is `None` when
    /// capture found no face.
    pub fn register(
        &mut self,
        name: &str,
        face: Option<Embedding>,
        now: DateTime<Utc>,
    ) -> Result<PersonRecord, KioskError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(KioskError::EmptyName);
        }
        let face = face.ok_or(KioskError::NoFaceDetected)?;

        if self.index.first_match(&face, self.tolerance).is_some() {
            // The matched identity is deliberately not reported.
            tracing::warn!(name, "registration refused: duplicate face");
            return Err(KioskError::DuplicateFace);
        }

        let record = self.store.register(name, &face, now)?;
        Arc::make_mut(&mut self.index).insert(
            IndexEntry { person_id: record.id, name: record.name.clone() },
            face,
        );
        Ok(record)
    }

    /// Reject a blank or already registered name before any capture happens.
    pub fn check_name(&self, name: &str) -> Result<(), KioskError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(KioskError::EmptyName);
        }
        match self.store.person_by_name(name)? {
            Some(_) => Err(KioskError::NameTaken(name.to_string())),
            None => Ok(()),
        }
    }

    pub fn person(&self, person_id: i64) -> Result<PersonRecord, KioskError> {
        self.store.person(person_id)?.ok_or(KioskError::UnknownPerson)
    }

    /// Run one issue/return attempt for the person verified in `session`.
    pub fn transact(
        &mut self,
        session: &KioskSession,
        raw_code: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome, KioskError> {
        let person = match session.state(now) {
            SessionState::NotVerified => return Err(KioskError::NotVerified),
            SessionState::Expired => return Err(KioskError::SessionExpired),
            SessionState::Active => session.active(now).ok_or(KioskError::NotVerified)?,
        };

        let code: ItemCode = raw_code
            .parse()
            .map_err(|_| KioskError::InvalidItemCode(raw_code.to_string()))?;

        match self.store.transact(person.person_id, &code) {
            Ok(outcome) => {
                tracing::info!(session = %session.id(), person = %person.name, %outcome, "transaction complete");
                Ok(outcome)
            }
            Err(StoreError::Circulation(CirculationError::MustReturnFirst { held })) => {
                tracing::info!(session = %session.id(), person = %person.name, %held, scanned = %code, "transaction refused");
                Err(KioskError::MustReturnFirst { name: person.name.clone(), held })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn records(&self) -> Result<Vec<PersonRecord>, KioskError> {
        Ok(self.store.records()?)
    }
}
