use chrono::{Local, TimeZone};

use crate::core::HistoryRecord;

use sms_proto::model::SMS_TIME_FORMAT;

/// Minimal escaping for text interpolated into the operator pages.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn layout(
    title: &str,
    body: &str,
) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape(title),
        body
    )
}

pub fn login_page(brand: &str) -> String {
    let body = format!(
        "<h1>{}</h1>\n\
         <form method=\"post\" action=\"/login\">\n\
         <label>Username <input type=\"text\" name=\"username\"></label><br>\n\
         <label>Password <input type=\"password\" name=\"password\"></label><br>\n\
         <button type=\"submit\">Login</button>\n\
         </form>",
        escape(brand)
    );
    layout("Login", &body)
}

pub fn index_page(brand: &str) -> String {
    let body = format!(
        "<h1>{}</h1>\n<ul>\n\
         <li><a href=\"/send_sms_cn\">Send SMS (CN)</a></li>\n\
         <li><a href=\"/send_sms_us\">Send SMS (US)</a></li>\n\
         <li><a href=\"/history_cn\">History (CN)</a></li>\n\
         <li><a href=\"/history_us\">History (US)</a></li>\n\
         <li><a href=\"/status\">Device status</a></li>\n\
         <li><a href=\"/help\">API help</a></li>\n\
         </ul>",
        escape(brand)
    );
    layout(brand, &body)
}

pub fn send_form_page(
    brand: &str,
    action: &str,
) -> String {
    let body = format!(
        "<h1>{}</h1>\n\
         <form method=\"post\" action=\"{}\">\n\
         <label>Sender <input type=\"text\" name=\"sender\"></label><br>\n\
         <label>Phone <input type=\"text\" name=\"phone\"></label><br>\n\
         <label>Message <textarea name=\"message\"></textarea></label><br>\n\
         <button type=\"submit\">Send</button>\n\
         </form>",
        escape(brand),
        escape(action)
    );
    layout("Send SMS", &body)
}

pub fn history_page(
    region: &str,
    records: &[HistoryRecord],
) -> String {
    let mut rows = String::new();
    for record in records {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td>\
             <td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            record.id,
            escape(&record.country),
            escape(&record.sender),
            format_unix(record.record_time),
            escape(&record.phone),
            escape(&record.message),
            format_unix(record.time),
            format_unix(record.sent_time),
            if record.ack_observed { "yes" } else { "no" },
        ));
    }
    let body = format!(
        "<h1>History {}</h1>\n<table border=\"1\">\n\
         <tr><th>ID</th><th>Country</th><th>Sender</th><th>Recorded</th>\
         <th>Phone</th><th>Message</th><th>Time</th><th>Sent</th>\
         <th>ACK</th></tr>\n\
         {}</table>",
        escape(region),
        rows
    );
    layout("History", &body)
}

pub fn help_text() -> &'static str {
    "GET:\n\
     \x20 /random_key?range=(charset, defaults to [a-zA-Z0-9_])&length=(defaults to 8)\n\
     \x20 /status\n\
     POST:\n\
     \x20 /send_sms?key=(access key, not needed with a web session)&sender=(origin label)&phone=(phone number)&message=(text)\n\
     \x20 /send_sms_cn, /send_sms_us\n"
}

fn format_unix(ts: i64) -> String {
    if ts == 0 {
        return String::new();
    }
    Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|t| t.format(SMS_TIME_FORMAT).to_string())
        .unwrap_or_default()
}
