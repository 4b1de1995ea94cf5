//! Small pieces shared by the ONNX Runtime models.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use gaze_core::DetectionError;
use ort::session::Session;

/// Opens the ONNX model at `path`.
pub(crate) fn load_session(path: &Path) -> Result<Session, DetectionError> {
    Session::builder()
        .map_err(backend)?
        .commit_from_file(path)
        .map_err(backend)
}

/// Locks a model session, recovering it if an earlier holder panicked.
///
/// A run that panics mid-inference leaves no partial state in the session
/// that a later run depends on, so the guard is taken over instead of
/// failing every following frame.
pub(crate) fn lock_model<T>(model: &Mutex<T>) -> MutexGuard<'_, T> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn backend(e: impl std::fmt::Display) -> DetectionError {
    DetectionError::Backend(e.to_string())
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
