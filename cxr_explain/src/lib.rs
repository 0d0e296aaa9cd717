//! Post-hoc explanation overlays for the chest X-ray classifier.
//!
//! Two independent explainers, both operating against the same trained model
//! and preprocessing as the classifier:
//!
//! - [`lime`]: perturbation-based. Superpixel segmentation, many perturbed
//!   forward passes, a local linear surrogate, and a boundary overlay of the
//!   top positively-weighted superpixels.
//! - [`grad_cam`]: gradient-based. One forward and one backward pass, the
//!   gradient of the top class score pooled into per-channel weights and
//!   rendered as a heat map blended over the original image.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

pub mod grad_cam;
pub mod lime;
pub mod render;
pub mod segmentation;
pub mod surrogate;

pub use grad_cam::{explain_gradient, GradCamExplanation, GradCamOptions};
pub use lime::{explain_perturbation, LimeExplanation, LimeOptions};

/// Cooperative cancellation flag shared between the caller and a running
/// perturbation worker. The worker checks it between forward-pass batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Tie cancellation to a scope: the returned guard cancels this token
    /// when dropped unless it was disarmed first. Lets a caller guarantee a
    /// detached worker stops even when the caller itself is dropped.
    pub fn drop_guard(&self) -> CancelGuard {
        CancelGuard {
            token: self.clone(),
            armed: true,
        }
    }
}

/// Cancels its [`CancelToken`] on drop. See [`CancelToken::drop_guard`].
#[derive(Debug)]
pub struct CancelGuard {
    token: CancelToken,
    armed: bool,
}

impl CancelGuard {
    /// Consume the guard without cancelling.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

/// Progress of a perturbation run, in completed samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let shared = token.clone();
        shared.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_drop_guard_cancels() {
        let token = CancelToken::new();
        {
            let _guard = token.drop_guard();
            assert!(!token.is_cancelled());
        }
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_disarmed_guard_does_not_cancel() {
        let token = CancelToken::new();
        let guard = token.drop_guard();
        guard.disarm();
        assert!(!token.is_cancelled());
    }
}
