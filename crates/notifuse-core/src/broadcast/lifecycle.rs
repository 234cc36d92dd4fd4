//! Broadcast status transitions
//!
//! Each function checks the guard for one operation and mutates the
//! broadcast in place. They run inside the storage transaction, so a guard
//! failure leaves nothing written.

use super::types::ScheduleBroadcastRequest;
use chrono::{DateTime, Utc};
use notifuse_common::{Error, Result};
use notifuse_storage::models::{Broadcast, BroadcastStatus, ScheduleSettings};
use tracing::warn;

fn require(
    broadcast: &Broadcast,
    action: &'static str,
    allowed: &[BroadcastStatus],
) -> Result<()> {
    if allowed.contains(&broadcast.status) {
        return Ok(());
    }

    let names: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
    let required = match names.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} or {}", rest.join(", "), last),
        _ => names.join(""),
    };

    Err(Error::InvalidStatus {
        action,
        required,
        actual: broadcast.status.to_string(),
    })
}

/// Only drafts may be edited
pub fn ensure_editable(broadcast: &Broadcast) -> Result<()> {
    require(broadcast, "update", &[BroadcastStatus::Draft])
}

/// Anything but a sending broadcast may be deleted
pub fn ensure_deletable(broadcast: &Broadcast) -> Result<()> {
    if broadcast.status.allows_deletion() {
        return Ok(());
    }
    require(
        broadcast,
        "delete",
        &[
            BroadcastStatus::Draft,
            BroadcastStatus::Scheduled,
            BroadcastStatus::Paused,
            BroadcastStatus::Sent,
            BroadcastStatus::Cancelled,
        ],
    )
}

/// Start now, or schedule for later
pub fn apply_schedule(
    broadcast: &mut Broadcast,
    request: &ScheduleBroadcastRequest,
    now: DateTime<Utc>,
) -> Result<()> {
    require(broadcast, "schedule", &[BroadcastStatus::Draft])?;

    if request.send_now {
        broadcast.status = BroadcastStatus::Sending;
        broadcast.started_at = Some(now);
        broadcast.schedule = ScheduleSettings::default();
    } else {
        let schedule = ScheduleSettings {
            is_scheduled: true,
            scheduled_date: request.scheduled_date.clone(),
            scheduled_time: request.scheduled_time.clone(),
            timezone: request.timezone.clone(),
            use_recipient_timezone: request.use_recipient_timezone,
        };
        schedule.parse_scheduled_date_time()?;

        broadcast.status = BroadcastStatus::Scheduled;
        broadcast.schedule = schedule;
        broadcast.started_at = None;
    }

    broadcast.updated_at = now;
    Ok(())
}

pub fn apply_pause(broadcast: &mut Broadcast, now: DateTime<Utc>) -> Result<()> {
    require(broadcast, "pause", &[BroadcastStatus::Sending])?;

    broadcast.status = BroadcastStatus::Paused;
    broadcast.paused_at = Some(now);
    broadcast.updated_at = now;
    Ok(())
}

/// Resume a paused broadcast; returns whether sending starts now.
///
/// The original schedule decides: a schedule still in the future puts the
/// broadcast back to `scheduled`, otherwise it goes straight to `sending`.
pub fn apply_resume(broadcast: &mut Broadcast, now: DateTime<Utc>) -> Result<bool> {
    require(broadcast, "resume", &[BroadcastStatus::Paused])?;

    let scheduled_at = match broadcast.schedule.parse_scheduled_date_time() {
        Ok(at) => at,
        Err(e) => {
            warn!(
                broadcast_id = %broadcast.id,
                error = %e,
                "Unreadable schedule on resume, starting now"
            );
            None
        }
    };
    let start_now = scheduled_at.map_or(true, |at| at <= now);

    broadcast.paused_at = None;
    if start_now {
        broadcast.status = BroadcastStatus::Sending;
        broadcast.started_at.get_or_insert(now);
    } else {
        broadcast.status = BroadcastStatus::Scheduled;
    }
    broadcast.updated_at = now;
    Ok(start_now)
}

/// Cancel a scheduled or paused broadcast; the schedule is kept for the record
pub fn apply_cancel(broadcast: &mut Broadcast, now: DateTime<Utc>) -> Result<()> {
    require(
        broadcast,
        "cancel",
        &[BroadcastStatus::Scheduled, BroadcastStatus::Paused],
    )?;

    broadcast.status = BroadcastStatus::Cancelled;
    broadcast.cancelled_at = Some(now);
    broadcast.updated_at = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use notifuse_storage::models::{AbTestSettings, AudienceSettings};
    use pretty_assertions::assert_eq;

    const ALL: [BroadcastStatus; 6] = [
        BroadcastStatus::Draft,
        BroadcastStatus::Scheduled,
        BroadcastStatus::Sending,
        BroadcastStatus::Paused,
        BroadcastStatus::Sent,
        BroadcastStatus::Cancelled,
    ];

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn broadcast(status: BroadcastStatus) -> Broadcast {
        Broadcast {
            id: "b_1".to_string(),
            workspace_id: "ws_1".to_string(),
            name: "Launch".to_string(),
            status,
            audience: AudienceSettings::default(),
            schedule: ScheduleSettings::default(),
            test_settings: AbTestSettings::default(),
            utm_parameters: None,
            tracking_enabled: false,
            created_at: now() - Duration::days(1),
            updated_at: now() - Duration::days(1),
            started_at: None,
            paused_at: None,
            cancelled_at: None,
            sent_at: None,
        }
    }

    fn scheduled_for(at: DateTime<Utc>) -> ScheduleSettings {
        ScheduleSettings {
            is_scheduled: true,
            scheduled_date: Some(at.format("%Y-%m-%d").to_string()),
            scheduled_time: Some(at.format("%H:%M").to_string()),
            timezone: Some("UTC".to_string()),
            use_recipient_timezone: false,
        }
    }

    #[test]
    fn test_pause_only_from_sending() {
        for status in ALL {
            let mut b = broadcast(status);
            let started = Some(now() - Duration::hours(2));
            b.started_at = started;

            match apply_pause(&mut b, now()) {
                Ok(()) => {
                    assert_eq!(status, BroadcastStatus::Sending);
                    assert_eq!(b.status, BroadcastStatus::Paused);
                    assert_eq!(b.paused_at, Some(now()));
                    assert_eq!(b.started_at, started);
                }
                Err(e) => {
                    assert_ne!(status, BroadcastStatus::Sending);
                    assert_eq!(
                        e.to_string(),
                        format!(
                            "cannot pause broadcast: status must be sending, current status is {}",
                            status
                        )
                    );
                }
            }
        }
    }

    #[test]
    fn test_resume_only_from_paused() {
        for status in ALL {
            let mut b = broadcast(status);
            let result = apply_resume(&mut b, now());
            assert_eq!(result.is_ok(), status == BroadcastStatus::Paused, "{}", status);
        }
    }

    #[test]
    fn test_resume_never_scheduled_starts_now() {
        let mut b = broadcast(BroadcastStatus::Paused);
        b.paused_at = Some(now() - Duration::minutes(5));

        assert!(apply_resume(&mut b, now()).unwrap());
        assert_eq!(b.status, BroadcastStatus::Sending);
        assert_eq!(b.started_at, Some(now()));
        assert_eq!(b.paused_at, None);
    }

    #[test]
    fn test_resume_preserves_started_at() {
        let mut b = broadcast(BroadcastStatus::Paused);
        let started = Some(now() - Duration::hours(3));
        b.started_at = started;
        b.schedule = scheduled_for(now() - Duration::hours(4));

        assert!(apply_resume(&mut b, now()).unwrap());
        assert_eq!(b.started_at, started);
    }

    #[test]
    fn test_resume_with_schedule_at_now_starts_now() {
        let mut b = broadcast(BroadcastStatus::Paused);
        b.schedule = scheduled_for(now());

        assert!(apply_resume(&mut b, now()).unwrap());
        assert_eq!(b.status, BroadcastStatus::Sending);
    }

    #[test]
    fn test_resume_future_schedule_goes_back_to_scheduled() {
        let mut b = broadcast(BroadcastStatus::Paused);
        b.schedule = scheduled_for(now() + Duration::days(2));

        assert!(!apply_resume(&mut b, now()).unwrap());
        assert_eq!(b.status, BroadcastStatus::Scheduled);
        assert_eq!(b.started_at, None);
        assert_eq!(b.paused_at, None);
    }

    #[test]
    fn test_schedule_for_later() {
        let mut b = broadcast(BroadcastStatus::Draft);
        let request = ScheduleBroadcastRequest {
            send_now: false,
            scheduled_date: Some("2025-04-01".to_string()),
            scheduled_time: Some("08:00".to_string()),
            timezone: Some("+02:00".to_string()),
            use_recipient_timezone: false,
        };

        apply_schedule(&mut b, &request, now()).unwrap();
        assert_eq!(b.status, BroadcastStatus::Scheduled);
        assert!(b.schedule.is_scheduled);
        assert_eq!(b.started_at, None);
        assert_eq!(
            b.schedule.parse_scheduled_date_time().unwrap(),
            Some(Utc.with_ymd_and_hms(2025, 4, 1, 6, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_schedule_send_now_clears_schedule() {
        let mut b = broadcast(BroadcastStatus::Draft);
        b.schedule = scheduled_for(now() + Duration::days(1));
        let request = ScheduleBroadcastRequest {
            send_now: true,
            ..Default::default()
        };

        apply_schedule(&mut b, &request, now()).unwrap();
        assert_eq!(b.status, BroadcastStatus::Sending);
        assert_eq!(b.started_at, Some(now()));
        assert_eq!(b.schedule, ScheduleSettings::default());
    }

    #[test]
    fn test_schedule_requires_draft() {
        let mut b = broadcast(BroadcastStatus::Scheduled);
        let request = ScheduleBroadcastRequest {
            send_now: true,
            ..Default::default()
        };
        assert!(matches!(
            apply_schedule(&mut b, &request, now()),
            Err(Error::InvalidStatus { action: "schedule", .. })
        ));
    }

    #[test]
    fn test_cancel_from_scheduled_or_paused() {
        for status in ALL {
            let mut b = broadcast(status);
            b.schedule = scheduled_for(now() + Duration::days(1));
            let before = b.schedule.clone();

            match apply_cancel(&mut b, now()) {
                Ok(()) => {
                    assert!(matches!(status, BroadcastStatus::Scheduled | BroadcastStatus::Paused));
                    assert_eq!(b.status, BroadcastStatus::Cancelled);
                    assert_eq!(b.cancelled_at, Some(now()));
                    assert_eq!(b.schedule, before);
                }
                Err(e) => {
                    assert!(e
                        .to_string()
                        .contains("status must be scheduled or paused"));
                }
            }
        }
    }

    #[test]
    fn test_delete_rejects_only_sending() {
        for status in ALL {
            let result = ensure_deletable(&broadcast(status));
            assert_eq!(result.is_err(), status == BroadcastStatus::Sending, "{}", status);
        }
    }
}
