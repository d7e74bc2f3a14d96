use chrono::{Local, NaiveDateTime, TimeZone};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Local wall-clock format carried inside SMS payloads.
pub const SMS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One SMS segment holds at most 140 length units: 1 per code point for
/// pure-ASCII text, 2 per code point otherwise.
const SEGMENT_LIMIT: usize = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    SmsReceived,
    SmsSend,
    SmsAck,
}

impl Tag {
    pub fn raw(self) -> u8 {
        match self {
            Tag::SmsReceived => 1,
            Tag::SmsSend => 2,
            Tag::SmsAck => 3,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Tag::SmsReceived),
            2 => Some(Tag::SmsSend),
            3 => Some(Tag::SmsAck),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sms {
    pub phone: String,
    #[serde(rename = "msg")]
    pub message: String,
    pub time: String,
}

impl Sms {
    /// Splits `text` into SMS segments for `phone`.
    ///
    /// The phone number is normalized to E.164 (`+86` prepended when no
    /// leading `+`). Segments share one timestamp captured here. Leading
    /// newlines and spaces are dropped at the start of every segment.
    pub fn split_long(
        phone: &str,
        text: &str,
    ) -> Vec<Sms> {
        let phone = normalize_phone(phone);
        let unit = if text.chars().all(|c| (c as u32) < 128) { 1 } else { 2 };

        let mut segments: Vec<String> = Vec::new();
        let mut buf = String::new();
        let mut used = 0_usize;

        for ch in text.chars() {
            if used == 0 && (ch == '\n' || ch == ' ') {
                continue;
            }
            used += unit;
            if used < SEGMENT_LIMIT {
                buf.push(ch);
            } else if used == SEGMENT_LIMIT {
                buf.push(ch);
                segments.push(std::mem::take(&mut buf));
                used = 0;
            } else {
                segments.push(std::mem::take(&mut buf));
                buf.push(ch);
                used = unit;
            }
        }
        if !buf.is_empty() {
            segments.push(buf);
        }

        let time = Local::now().format(SMS_TIME_FORMAT).to_string();
        segments
            .into_iter()
            .map(|message| Sms {
                phone: phone.clone(),
                message,
                time: time.clone(),
            })
            .collect()
    }

    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Unix seconds parsed from the SMS time string, 0 when unparseable
    /// (duplicate-retagged `D:` times land here on purpose).
    pub fn time_unix(&self) -> i64 {
        let Ok(naive) = NaiveDateTime::parse_from_str(&self.time, SMS_TIME_FORMAT)
        else {
            return 0;
        };
        Local
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.timestamp())
            .unwrap_or(0)
    }
}

/// Wire envelope. `md5` is the rendezvous key the remote echoes back in
/// its ACK; it must always equal `UPPER(HEX(MD5(data)))`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Msg {
    pub tag: u8,
    pub md5: String,
    pub data: String,
    #[serde(skip)]
    pub sms: Option<Sms>,
}

impl Msg {
    /// Builds one envelope per SMS segment, md5 already generated.
    pub fn batch(
        tag: Tag,
        sms: Vec<Sms>,
    ) -> Vec<Msg> {
        sms.into_iter()
            .map(|sms| {
                let data = sms.to_json();
                let md5 = md5_hex_upper(&data);
                Msg { tag: tag.raw(), md5, data, sms: Some(sms) }
            })
            .collect()
    }

    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Marks this envelope as a suppressed duplicate: the SMS time gets the
    /// `D:` prefix, the payload is re-serialized and the md5 regenerated so
    /// the invariant on `md5` keeps holding.
    pub fn retag_duplicate(&mut self) {
        let Some(sms) = self.sms.as_mut() else {
            return;
        };
        sms.time = format!("D:{}", sms.time);
        self.data = sms.to_json();
        self.regenerate_md5();
    }

    pub fn regenerate_md5(&mut self) {
        self.md5 = md5_hex_upper(&self.data);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub key: String,
}

impl Ack {
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

pub fn md5_hex_upper(data: &str) -> String {
    hex::encode_upper(Md5::digest(data.as_bytes()))
}

fn normalize_phone(phone: &str) -> String {
    if phone.starts_with('+') {
        phone.to_string()
    } else {
        format!("+86{phone}")
    }
}
