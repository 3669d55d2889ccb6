//! Terminal output for the inbox

use chrono::{DateTime, Local, TimeZone, Utc};
use mail::{InboxState, Message, Phase, Summary};
use std::fmt::Display;

/// Progress line on stderr for each state change
pub fn progress(state: &InboxState) {
    match state.phase {
        Phase::Authenticating => eprintln!("Waiting for Google sign-in in your browser..."),
        Phase::Fetching => eprintln!("Fetching unread messages..."),
        Phase::Analyzing => eprintln!(
            "Summarizing {}/{}",
            state.summaries.len(),
            state.messages.len()
        ),
        Phase::Unauthenticated | Phase::Ready => {}
    }
}

pub fn inbox(state: &InboxState) {
    if state.messages.is_empty() {
        println!("No unread messages.");
        return;
    }

    println!("{} unread\n", state.messages.len());
    for message in &state.messages {
        print!("{}", card(message, state.summary(&message.id), &Local));
    }
}

fn card<Tz>(message: &Message, summary: Option<&Summary>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut out = format!(
        "{}\n  From: {}\n  Date: {}\n  {}\n",
        message.subject(),
        message.from(),
        display_date(message, tz),
        message.snippet
    );

    if let Some(summary) = summary {
        out.push_str(&format!("  Summary: {}\n", summary.main_points));
        for item in &summary.action_items {
            out.push_str(&format!("    - {}\n", item));
        }
        if summary.needs_response {
            out.push_str("  Needs response\n");
        }
    }
    out.push('\n');
    out
}

/// `Date` header in `tz`, else the internal timestamp, else the raw header
fn display_date<Tz>(message: &Message, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if let Some(raw) = message.date() {
        return format_date(raw, tz);
    }
    message
        .internal_date
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|ts| ts.with_timezone(tz).format("%b %d at %H:%M").to_string())
        .unwrap_or_default()
}

fn format_date<Tz>(raw: &str, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match DateTime::parse_from_rfc2822(raw.trim()) {
        Ok(ts) => ts.with_timezone(tz).format("%b %d at %H:%M").to_string(),
        Err(_) => raw.to_string(),
    }
}
