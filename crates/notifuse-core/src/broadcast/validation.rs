//! Request validation

use super::types::ScheduleBroadcastRequest;
use notifuse_common::{Error, Result};
use notifuse_storage::models::{parse_timezone, Broadcast};

const MAX_NAME_LEN: usize = 255;

/// Validate a broadcast as it would be stored
pub fn validate_broadcast(broadcast: &Broadcast) -> Result<()> {
    let name = broadcast.name.trim();
    if name.is_empty() {
        return Err(Error::Validation("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }

    if broadcast.audience.is_empty() {
        return Err(Error::Validation(
            "audience requires at least one list or segment".to_string(),
        ));
    }

    let test = &broadcast.test_settings;
    if test.enabled {
        if test.variations.len() < 2 {
            return Err(Error::Validation(
                "A/B testing requires at least two variations".to_string(),
            ));
        }
        if !(1..=100).contains(&test.sample_percentage) {
            return Err(Error::Validation(
                "sample percentage must be between 1 and 100".to_string(),
            ));
        }
    } else if test.variations.len() != 1 {
        return Err(Error::Validation(
            "exactly one variation is required when A/B testing is disabled".to_string(),
        ));
    }

    if let Some(variation) = test.variations.iter().find(|v| v.template_id.trim().is_empty()) {
        return Err(Error::Validation(format!(
            "variation {} requires a template id",
            variation.id
        )));
    }

    if broadcast.schedule.is_scheduled {
        if broadcast.schedule.scheduled_date.as_deref().unwrap_or("").is_empty()
            || broadcast.schedule.scheduled_time.as_deref().unwrap_or("").is_empty()
        {
            return Err(Error::Validation(
                "scheduled broadcasts require a date and time".to_string(),
            ));
        }
        broadcast.schedule.parse_scheduled_date_time()?;
    }

    Ok(())
}

pub fn validate_schedule_request(request: &ScheduleBroadcastRequest) -> Result<()> {
    if request.send_now {
        return Ok(());
    }

    let date = request.scheduled_date.as_deref().unwrap_or("");
    let time = request.scheduled_time.as_deref().unwrap_or("");
    if date.is_empty() || time.is_empty() {
        return Err(Error::Validation(
            "scheduled_date and scheduled_time are required unless send_now is set".to_string(),
        ));
    }

    parse_timezone(request.timezone.as_deref().unwrap_or(""))?;
    Ok(())
}

pub fn validate_email(email: &str) -> Result<()> {
    let invalid = || Error::Validation(format!("invalid email address: {}", email));

    let (local, domain) = email.trim().split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notifuse_storage::models::{
        AbTestSettings, AudienceSettings, BroadcastStatus, BroadcastVariation, ScheduleSettings,
    };

    fn variation(id: &str, template_id: &str) -> BroadcastVariation {
        BroadcastVariation {
            id: id.to_string(),
            name: id.to_string(),
            template_id: template_id.to_string(),
            template: None,
        }
    }

    fn broadcast() -> Broadcast {
        Broadcast {
            id: "b_1".to_string(),
            workspace_id: "ws_1".to_string(),
            name: "Spring sale".to_string(),
            status: BroadcastStatus::Draft,
            audience: AudienceSettings {
                lists: vec!["list_1".to_string()],
                ..Default::default()
            },
            schedule: ScheduleSettings::default(),
            test_settings: AbTestSettings {
                variations: vec![variation("v1", "tpl_1")],
                ..Default::default()
            },
            utm_parameters: None,
            tracking_enabled: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            paused_at: None,
            cancelled_at: None,
            sent_at: None,
        }
    }

    #[test]
    fn test_valid_broadcast() {
        assert!(validate_broadcast(&broadcast()).is_ok());
    }

    #[test]
    fn test_name_and_audience_required() {
        let mut b = broadcast();
        b.name = "   ".to_string();
        assert!(matches!(validate_broadcast(&b), Err(Error::Validation(_))));

        let mut b = broadcast();
        b.name = "x".repeat(256);
        assert!(validate_broadcast(&b).is_err());

        let mut b = broadcast();
        b.audience = AudienceSettings::default();
        assert!(validate_broadcast(&b).is_err());
    }

    #[test]
    fn test_ab_testing_rules() {
        let mut b = broadcast();
        b.test_settings.enabled = true;
        b.test_settings.sample_percentage = 20;
        assert!(validate_broadcast(&b).is_err(), "one variation is not a test");

        b.test_settings.variations.push(variation("v2", "tpl_2"));
        assert!(validate_broadcast(&b).is_ok());

        b.test_settings.sample_percentage = 0;
        assert!(validate_broadcast(&b).is_err());

        b.test_settings.sample_percentage = 50;
        b.test_settings.variations[1].template_id = String::new();
        assert!(validate_broadcast(&b).is_err());

        let mut b = broadcast();
        b.test_settings.variations.push(variation("v2", "tpl_2"));
        assert!(validate_broadcast(&b).is_err(), "two variations without A/B testing");
    }

    #[test]
    fn test_scheduled_broadcast_needs_valid_date() {
        let mut b = broadcast();
        b.schedule.is_scheduled = true;
        assert!(validate_broadcast(&b).is_err());

        b.schedule.scheduled_date = Some("2030-01-15".to_string());
        b.schedule.scheduled_time = Some("09:30".to_string());
        b.schedule.timezone = Some("Mars/Olympus".to_string());
        assert!(validate_broadcast(&b).is_err());

        b.schedule.timezone = Some("+01:00".to_string());
        assert!(validate_broadcast(&b).is_ok());
    }

    #[test]
    fn test_schedule_request() {
        assert!(validate_schedule_request(&ScheduleBroadcastRequest {
            send_now: true,
            ..Default::default()
        })
        .is_ok());

        let later = ScheduleBroadcastRequest {
            scheduled_date: Some("2030-01-15".to_string()),
            scheduled_time: None,
            ..Default::default()
        };
        assert!(validate_schedule_request(&later).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("jane@example.com").is_ok());
        for bad in ["", "jane", "@example.com", "jane@", "jane@localhost", "a@b@c.com"] {
            assert!(validate_email(bad).is_err(), "{} should be rejected", bad);
        }
    }
}
