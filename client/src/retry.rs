//! Abbrechbare Wiederholung mit festem Abstand
//!
//! Wird von Registrierung und Praesenz-Abfrage genutzt. Laufende
//! Wiederholungen werden ueber ein [`CancellationToken`] beendet, sodass nach
//! `disconnect` kein Timer mehr feuert.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Wie oft und in welchem Abstand wiederholt wird
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` = bis zum Erfolg oder Abbruch
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unlimited(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn limited(max_attempts: u32, delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts.max(1)),
        }
    }
}

/// Ergebnis einer Wiederholung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Done(T),
    Exhausted,
    Cancelled,
}

/// Ruft `attempt` auf bis es `Some` liefert, die Versuche erschoepft sind
/// oder `cancel` ausgeloest wird
///
/// `attempt` erhaelt die laufende Versuchsnummer (ab 1).
pub async fn retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let mut versuch = 0u32;
    loop {
        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled;
        }
        versuch += 1;

        let ergebnis = tokio::select! {
            biased;
            _ = cancel.cancelled() => return RetryOutcome::Cancelled,
            r = attempt(versuch) => r,
        };
        if let Some(wert) = ergebnis {
            return RetryOutcome::Done(wert);
        }

        if policy.max_attempts.is_some_and(|max| versuch >= max) {
            return RetryOutcome::Exhausted;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return RetryOutcome::Cancelled,
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn erfolg_beim_dritten_versuch() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let ergebnis = retry(
            RetryPolicy::unlimited(Duration::from_secs(1)),
            &cancel,
            |n| async move { (n == 3).then_some(n) },
        )
        .await;
        assert_eq!(ergebnis, RetryOutcome::Done(3));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn begrenzte_versuche() {
        let cancel = CancellationToken::new();
        let zaehler = Arc::new(AtomicU32::new(0));
        let z = Arc::clone(&zaehler);
        let ergebnis: RetryOutcome<()> = retry(
            RetryPolicy::limited(3, Duration::from_millis(500)),
            &cancel,
            move |_| {
                z.fetch_add(1, Ordering::SeqCst);
                async { None }
            },
        )
        .await;
        assert_eq!(ergebnis, RetryOutcome::Exhausted);
        assert_eq!(zaehler.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn abbruch_beendet_warten() {
        let cancel = CancellationToken::new();
        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            c.cancel();
        });

        let zaehler = Arc::new(AtomicU32::new(0));
        let z = Arc::clone(&zaehler);
        let ergebnis: RetryOutcome<()> = retry(
            RetryPolicy::unlimited(Duration::from_secs(1)),
            &cancel,
            move |_| {
                z.fetch_add(1, Ordering::SeqCst);
                async { None }
            },
        )
        .await;
        assert_eq!(ergebnis, RetryOutcome::Cancelled);
        assert_eq!(zaehler.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bereits_abgebrochen() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ergebnis = retry(RetryPolicy::limited(1, Duration::ZERO), &cancel, |_| async {
            Some(1)
        })
        .await;
        assert_eq!(ergebnis, RetryOutcome::Cancelled);
    }
}
