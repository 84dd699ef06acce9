use crate::reminder::{Reminder, ReferenceZone};

use super::OutgoingMail;

pub fn compose_notification(reminder: &Reminder, zone: &ReferenceZone) -> OutgoingMail {
    let subject = escape_html(&reminder.subject);
    let description = escape_html(&reminder.description);
    let scheduled_for = zone.render(reminder.fire_at);

    let html_body = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #333;">Reminder Notification</h2>
  <div style="background-color: #f9f9f9; padding: 20px; border-radius: 5px; margin: 20px 0;">
    <h3 style="color: #2563eb; margin-top: 0;">{subject}</h3>
    <p style="color: #666; line-height: 1.6;">{description}</p>
  </div>
  <div style="color: #888; font-size: 12px; text-align: center; margin-top: 30px;">
    <p>This reminder was scheduled for: {scheduled_for}</p>
    <p>Sent via your personal reminder system</p>
  </div>
</div>
"#
    );

    OutgoingMail {
        to: reminder.email.clone(),
        subject: format!("Reminder: {}", reminder.subject),
        html_body,
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
