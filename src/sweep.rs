use std::time::Duration;

use tracing::{error, info};
use uuid::Uuid;

use crate::handlers::assignments::approve_in_tx;
use crate::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Reviewer identity stamped on deadline-triggered approvals.
const AUTO_REVIEWER: &str = "auto";

/// Spawns the auto-approval sweep. Each tick picks up completed assignments
/// whose deadline has passed and applies the same approve transition as the
/// manual path; the conditional update inside `approve_in_tx` re-checks the
/// status, so an assignment rejected between the snapshot and the approval
/// is left alone.
pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = run_once(&state).await {
                error!("Auto-approval sweep failed: {}", e);
            }
        }
    });
}

async fn run_once(state: &AppState) -> crate::errors::Result<()> {
    let due: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM assignments
        WHERE status = 'completed' AND auto_approve_at <= NOW()
        ORDER BY auto_approve_at
        LIMIT 100
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    if due.is_empty() {
        return Ok(());
    }

    let mut approved = 0usize;
    for (assignment_id,) in due {
        match approve_in_tx(&state.db, assignment_id, AUTO_REVIEWER).await? {
            Some(outcome) => {
                approved += 1;
                if let Some(email) = outcome.user_email {
                    state
                        .mailer
                        .send_award_notification(
                            &email,
                            &outcome.user_name,
                            &outcome.task_title,
                            outcome.reward,
                        )
                        .await;
                }
            }
            // Lost the race to a manual reviewer; nothing to do.
            None => {}
        }
    }

    info!("Auto-approval sweep approved {} assignments", approved);
    Ok(())
}
