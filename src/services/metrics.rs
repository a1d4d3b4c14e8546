use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::{
    db::DbPool,
    error::AppError,
    models::email::{EmailLog, EmailStatus},
};

/// SES suspends accounts above these rates (percent of attempts).
pub const BOUNCE_RATE_LIMIT: f64 = 5.0;
pub const COMPLAINT_RATE_LIMIT: f64 = 0.1;
const RECENT_ISSUES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Text,
    Csv,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusCounts {
    pub total_attempts: usize,
    pub total_sent: usize,
    pub total_delivered: usize,
    pub total_bounced: usize,
    pub total_complained: usize,
    pub total_failed: usize,
    pub total_pending: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rates {
    pub success_rate: f64,
    pub bounce_rate: f64,
    pub complaint_rate: f64,
}

impl Rates {
    pub fn bounce_warning(&self) -> bool {
        self.bounce_rate > BOUNCE_RATE_LIMIT
    }

    pub fn complaint_warning(&self) -> bool {
        self.complaint_rate > COMPLAINT_RATE_LIMIT
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, FromRow)]
pub struct UserStats {
    pub total_users: i64,
    pub users_with_preferences: i64,
    pub unsubscribed_users: i64,
    pub complained_users: i64,
    pub invalid_email_users: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeBreakdown {
    pub email_type: String,
    pub count: usize,
    pub sent: usize,
    pub bounced: usize,
    pub complained: usize,
    pub failed: usize,
}

impl TypeBreakdown {
    pub fn success_rate(&self) -> f64 {
        percent(self.sent, self.count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub created_at: DateTime<Utc>,
    pub recipient_email: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmailMetrics {
    pub days: i64,
    pub counts: StatusCounts,
    pub rates: Rates,
    pub users: UserStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<Vec<TypeBreakdown>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_bounces: Option<Vec<Issue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_complaints: Option<Vec<Issue>>,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn counts_toward_sent(status: EmailStatus) -> bool {
    matches!(status, EmailStatus::Sent | EmailStatus::Delivered)
}

impl EmailMetrics {
    /// Aggregates logs that are already restricted to the window, newest first.
    pub fn from_logs(days: i64, logs: &[EmailLog], users: UserStats, detailed: bool) -> Self {
        let mut counts = StatusCounts {
            total_attempts: logs.len(),
            ..StatusCounts::default()
        };
        for log in logs {
            let status = log.status();
            if counts_toward_sent(status) {
                counts.total_sent += 1;
            }
            match status {
                EmailStatus::Delivered => counts.total_delivered += 1,
                EmailStatus::Bounced => counts.total_bounced += 1,
                EmailStatus::Complained => counts.total_complained += 1,
                EmailStatus::Failed => counts.total_failed += 1,
                EmailStatus::Pending => counts.total_pending += 1,
                EmailStatus::Sent => {}
            }
        }
        let rates = Rates {
            success_rate: percent(counts.total_delivered, counts.total_attempts),
            bounce_rate: percent(counts.total_bounced, counts.total_attempts),
            complaint_rate: percent(counts.total_complained, counts.total_attempts),
        };

        let mut metrics = Self {
            days,
            counts,
            rates,
            users,
            ..Self::default()
        };
        if !detailed {
            return metrics;
        }

        let mut by_type: BTreeMap<String, TypeBreakdown> = BTreeMap::new();
        for log in logs {
            let entry = by_type
                .entry(log.email_type.clone())
                .or_insert_with(|| TypeBreakdown {
                    email_type: log.email_type.clone(),
                    ..TypeBreakdown::default()
                });
            entry.count += 1;
            match log.status() {
                status if counts_toward_sent(status) => entry.sent += 1,
                EmailStatus::Bounced => entry.bounced += 1,
                EmailStatus::Complained => entry.complained += 1,
                EmailStatus::Failed => entry.failed += 1,
                _ => {}
            }
        }
        let mut breakdown: Vec<TypeBreakdown> = by_type.into_values().collect();
        breakdown.sort_by(|a, b| b.count.cmp(&a.count));
        metrics.breakdown = Some(breakdown);

        let issues = |status: EmailStatus, detail: fn(&EmailLog) -> Option<String>| {
            logs.iter()
                .filter(|log| log.status() == status)
                .take(RECENT_ISSUES)
                .map(|log| Issue {
                    created_at: log.created_at,
                    recipient_email: log.recipient_email.clone(),
                    detail: detail(log).unwrap_or_else(|| "Unknown".into()),
                })
                .collect::<Vec<_>>()
        };
        metrics.recent_bounces = Some(issues(EmailStatus::Bounced, |log| log.bounce_type.clone()));
        metrics.recent_complaints = Some(issues(EmailStatus::Complained, |log| {
            log.complaint_feedback_type.clone()
        }));
        metrics
    }

    pub fn render(&self, format: ReportFormat) -> Result<String, AppError> {
        match format {
            ReportFormat::Text => Ok(self.render_text()),
            ReportFormat::Csv => Ok(self.render_csv()),
            ReportFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|err| AppError::Other(err.into())),
        }
    }

    fn render_text(&self) -> String {
        let c = &self.counts;
        let r = &self.rates;
        let u = &self.users;
        let flag = |warn: bool| if warn { "WARNING" } else { "OK" };
        let mut out = vec![
            format!("Email Metrics Report - Last {} days", self.days),
            "=".repeat(60),
            String::new(),
            "Email Sending Statistics:".into(),
            format!("   Total Sent:      {}", c.total_sent),
            format!("   Delivered:       {}", c.total_delivered),
            format!("   Bounced:         {}", c.total_bounced),
            format!("   Complained:      {}", c.total_complained),
            format!("   Failed:          {}", c.total_failed),
            format!("   Pending:         {}", c.total_pending),
            String::new(),
            "Delivery Rates:".into(),
            format!("   Success Rate:    {:.2}%", r.success_rate),
            format!("   Bounce Rate:     {:.2}% {}", r.bounce_rate, flag(r.bounce_warning())),
            format!(
                "   Complaint Rate:  {:.2}% {}",
                r.complaint_rate,
                flag(r.complaint_warning())
            ),
        ];
        if r.bounce_warning() {
            out.push(format!(
                "   WARNING: Bounce rate exceeds {BOUNCE_RATE_LIMIT}% (AWS SES threshold)"
            ));
        }
        if r.complaint_warning() {
            out.push(format!(
                "   CRITICAL: Complaint rate exceeds {COMPLAINT_RATE_LIMIT}% (AWS SES threshold)"
            ));
        }
        out.extend([
            String::new(),
            "User Email Status:".into(),
            format!("   Total Users:           {}", u.total_users),
            format!("   With Preferences:      {}", u.users_with_preferences),
            format!("   Unsubscribed:          {}", u.unsubscribed_users),
            format!("   Complained:            {}", u.complained_users),
            format!("   Invalid Email:         {}", u.invalid_email_users),
        ]);

        if let Some(breakdown) = &self.breakdown {
            out.push(String::new());
            out.push("Email Type Breakdown:".into());
            for item in breakdown {
                out.push(format!(
                    "   {:20} | Total: {:4} | Sent: {:4} | Success: {:5.1}%",
                    item.email_type,
                    item.count,
                    item.sent,
                    item.success_rate()
                ));
            }
        }
        for (title, issues) in [
            ("Recent Bounces:", &self.recent_bounces),
            ("Recent Complaints:", &self.recent_complaints),
        ] {
            let Some(issues) = issues.as_ref().filter(|issues| !issues.is_empty()) else {
                continue;
            };
            out.push(String::new());
            out.push(title.into());
            for issue in issues {
                out.push(format!(
                    "   {} | {} | {}",
                    issue.created_at.format("%Y-%m-%d %H:%M"),
                    issue.recipient_email,
                    issue.detail
                ));
            }
        }
        out.join("\n")
    }

    fn render_csv(&self) -> String {
        let c = &self.counts;
        let r = &self.rates;
        let u = &self.users;
        let mut rows = vec![
            "metric,value".to_string(),
            format!("days,{}", self.days),
            format!("total_attempts,{}", c.total_attempts),
            format!("total_sent,{}", c.total_sent),
            format!("total_delivered,{}", c.total_delivered),
            format!("total_bounced,{}", c.total_bounced),
            format!("total_complained,{}", c.total_complained),
            format!("total_failed,{}", c.total_failed),
            format!("total_pending,{}", c.total_pending),
            format!("success_rate,{:.2}", r.success_rate),
            format!("bounce_rate,{:.2}", r.bounce_rate),
            format!("complaint_rate,{:.2}", r.complaint_rate),
            format!("total_users,{}", u.total_users),
            format!("users_with_preferences,{}", u.users_with_preferences),
            format!("unsubscribed_users,{}", u.unsubscribed_users),
            format!("complained_users,{}", u.complained_users),
            format!("invalid_email_users,{}", u.invalid_email_users),
        ];
        if let Some(breakdown) = &self.breakdown {
            rows.push(String::new());
            rows.push("email_type,count,sent,bounced,complained,failed".into());
            for item in breakdown {
                rows.push(format!(
                    "{},{},{},{},{},{}",
                    item.email_type, item.count, item.sent, item.bounced, item.complained, item.failed
                ));
            }
        }
        rows.join("\n")
    }
}

pub async fn user_statistics(db: &DbPool) -> Result<UserStats, AppError> {
    let stats = sqlx::query_as::<_, UserStats>(
        r#"SELECT
            (SELECT COUNT(*) FROM users) AS total_users,
            COUNT(*) AS users_with_preferences,
            COALESCE(SUM(CASE WHEN unsubscribed_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS unsubscribed_users,
            COALESCE(SUM(CASE WHEN complaint_received THEN 1 ELSE 0 END), 0) AS complained_users,
            COALESCE(SUM(CASE WHEN is_email_valid THEN 0 ELSE 1 END), 0) AS invalid_email_users
           FROM email_preferences"#,
    )
    .fetch_one(db)
    .await?;
    Ok(stats)
}

/// Start of a reporting window of `days` days ending at `now`.
pub fn window_start(days: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
    if days < 1 {
        return Err(AppError::BadRequest("the report window must be at least one day".into()));
    }
    Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| AppError::BadRequest(format!("a {days} day report window is too long")))
}

pub async fn collect(db: &DbPool, days: i64, detailed: bool) -> Result<EmailMetrics, AppError> {
    let since = window_start(days, Utc::now())?;
    let logs = EmailLog::list_since(db, since).await?;
    let users = user_statistics(db).await?;
    Ok(EmailMetrics::from_logs(days, &logs, users, detailed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(id: i64, email_type: &str, status: EmailStatus) -> EmailLog {
        EmailLog {
            id,
            email_type: email_type.into(),
            recipient_email: format!("user{id}@example.com"),
            recipient_user_id: None,
            subject: "Subject".into(),
            status: status.as_str().into(),
            ses_message_id: None,
            error_message: None,
            bounce_type: (status == EmailStatus::Bounced).then(|| "Permanent".to_string()),
            bounce_subtype: None,
            complaint_feedback_type: None,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            bounced_at: None,
            complained_at: None,
        }
    }

    fn sample() -> Vec<EmailLog> {
        vec![
            log(1, "registration", EmailStatus::Delivered),
            log(2, "registration", EmailStatus::Sent),
            log(3, "vacation_invitation", EmailStatus::Bounced),
            log(4, "vacation_invitation", EmailStatus::Failed),
        ]
    }

    #[test]
    fn counts_and_rates() {
        let metrics = EmailMetrics::from_logs(7, &sample(), UserStats::default(), false);
        assert_eq!(metrics.counts.total_sent, 2);
        assert_eq!(metrics.counts.total_delivered, 1);
        assert_eq!(metrics.counts.total_bounced, 1);
        assert_eq!(metrics.rates.bounce_rate, 25.0);
        assert_eq!(metrics.rates.success_rate, 25.0);
        assert!(metrics.rates.bounce_warning());
        assert!(!metrics.rates.complaint_warning());
        assert!(metrics.breakdown.is_none());
    }

    #[test]
    fn empty_window_has_zero_rates() {
        let metrics = EmailMetrics::from_logs(7, &[], UserStats::default(), true);
        assert_eq!(metrics.rates, Rates::default());
        assert_eq!(metrics.breakdown, Some(Vec::new()));
    }

    #[test]
    fn detailed_breakdown_and_issues() {
        let metrics = EmailMetrics::from_logs(7, &sample(), UserStats::default(), true);
        let breakdown = metrics.breakdown.clone().unwrap();
        assert_eq!(breakdown.len(), 2);
        let registration = breakdown.iter().find(|b| b.email_type == "registration").unwrap();
        assert_eq!(registration.success_rate(), 100.0);
        let bounces = metrics.recent_bounces.clone().unwrap();
        assert_eq!(bounces[0].detail, "Permanent");

        let text = metrics.render(ReportFormat::Text).unwrap();
        assert!(text.contains("Email Metrics Report - Last 7 days"));
        assert!(text.contains("WARNING: Bounce rate exceeds"));
        assert!(text.contains("Recent Bounces:"));
        assert!(!text.contains("Recent Complaints:"));
    }

    #[test]
    fn csv_and_json_outputs() {
        let metrics = EmailMetrics::from_logs(3, &sample(), UserStats::default(), false);
        let csv = metrics.render(ReportFormat::Csv).unwrap();
        assert!(csv.starts_with("metric,value\ndays,3"));
        assert!(csv.contains("bounce_rate,25.00"));
        let json: serde_json::Value =
            serde_json::from_str(&metrics.render(ReportFormat::Json).unwrap()).unwrap();
        assert_eq!(json["counts"]["total_failed"], 1);
        assert!(json.get("breakdown").is_none());
    }

    #[test]
    fn report_window_is_checked() {
        let now = Utc::now();
        assert_eq!(window_start(7, now).unwrap(), now - Duration::days(7));
        assert!(matches!(window_start(0, now), Err(AppError::BadRequest(_))));
        assert!(matches!(window_start(i64::MAX, now), Err(AppError::BadRequest(_))));
        assert!(matches!(window_start(100_000_000, now), Err(AppError::BadRequest(_))));
    }
}
