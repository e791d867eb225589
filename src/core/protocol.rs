//! PJLink line codec.
//!
//! Requests look like `%1POWR 1\r`, replies like `%1POWR=OK\r`. A connection starts
//! with a greeting from the projector (`PJLINK 0` or `PJLINK 1 <seed>`); when a seed
//! is given the md5 digest of seed + password is prefixed to the first request.

use crate::domain::model::{
    AvMuteState, AvMuteTarget, Command, DeviceClass, ErrorStatus, InputSource, LampStatus,
    ResponseStatus,
};
use crate::utils::error::{PjlinkError, Result};

pub const TERMINATOR: u8 = b'\r';
pub const QUERY: &str = "?";
pub const SEARCH_COMMAND: &str = "%2SRCH\r";
pub const MAX_LINE_LENGTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub class: DeviceClass,
    pub command: Command,
    pub status: ResponseStatus,
    pub parameter: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Greeting {
    NoAuthentication,
    Authentication { seed: String },
    /// `PJLINK ERRA`: the projector refused the session outright.
    Rejected,
}

impl Greeting {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.split_whitespace();

        if parts.next() != Some("PJLINK") {
            return Err(PjlinkError::InvalidResponseError {
                response: line.to_string(),
            });
        }

        match (parts.next(), parts.next()) {
            (Some("0"), None) => Ok(Greeting::NoAuthentication),
            (Some("1"), Some(seed)) if !seed.is_empty() => Ok(Greeting::Authentication {
                seed: seed.to_string(),
            }),
            (Some("ERRA"), None) => Ok(Greeting::Rejected),
            _ => Err(PjlinkError::InvalidResponseError {
                response: line.to_string(),
            }),
        }
    }

    pub fn requires_authentication(&self) -> bool {
        matches!(self, Greeting::Authentication { .. })
    }
}

pub fn auth_digest(seed: &str, password: &str) -> String {
    format!("{:x}", md5::compute(format!("{}{}", seed, password)))
}

/// An empty parameter turns the request into a query (`?`).
pub fn build_command(class: DeviceClass, command: Command, parameter: &str) -> String {
    let parameter = if parameter.is_empty() { QUERY } else { parameter };
    format!("%{}{} {}\r", class.wire_digit(), command.code(), parameter)
}

pub fn parse_response(line: &str) -> Result<Response> {
    let line = line.trim_end_matches(['\r', '\n']);
    let invalid = || PjlinkError::InvalidResponseError {
        response: line.to_string(),
    };

    if line.starts_with("PJLINK ERRA") {
        return Err(PjlinkError::AuthenticationError {
            message: "projector rejected the authentication digest".to_string(),
        });
    }

    let body = line.strip_prefix('%').ok_or_else(invalid)?;
    if body.len() < 6 || !body.is_char_boundary(5) || !body.is_char_boundary(6) {
        return Err(invalid());
    }

    let class = body
        .chars()
        .next()
        .and_then(DeviceClass::from_wire_digit)
        .ok_or_else(invalid)?;
    let command = Command::from_code(&body[1..5]).ok_or_else(invalid)?;
    if &body[5..6] != "=" {
        return Err(invalid());
    }

    let payload = &body[6..];
    let (status, parameter) = match payload {
        "OK" => (ResponseStatus::Success, String::new()),
        "ERR1" => (ResponseStatus::UndefinedCommand, String::new()),
        "ERR2" => (ResponseStatus::OutOfParameter, String::new()),
        "ERR3" => (ResponseStatus::UnavailableTime, String::new()),
        "ERR4" => (ResponseStatus::ProjectorFailure, String::new()),
        "ERRA" => (ResponseStatus::AuthenticationError, String::new()),
        value => (ResponseStatus::Success, value.to_string()),
    };

    Ok(Response {
        class,
        command,
        status,
        parameter,
    })
}

pub fn input_parameter(source: InputSource, channel: char) -> Option<String> {
    let digit = source.wire_digit()?;
    if !channel.is_ascii_alphanumeric() {
        return None;
    }
    Some(format!("{}{}", digit, channel.to_ascii_uppercase()))
}

pub fn parse_input(parameter: &str) -> Option<(InputSource, char)> {
    let mut chars = parameter.trim().chars();
    let kind = InputSource::from_wire_digit(chars.next()?);
    let channel = chars.next()?;
    if chars.next().is_some() || kind == InputSource::Unknown {
        return None;
    }
    Some((kind, channel))
}

pub fn parse_input_list(parameter: &str) -> Vec<(InputSource, char)> {
    parameter.split_whitespace().filter_map(parse_input).collect()
}

pub fn parse_class(parameter: &str) -> Option<DeviceClass> {
    let mut chars = parameter.trim().chars();
    let class = DeviceClass::from_wire_digit(chars.next()?)?;
    chars.next().is_none().then_some(class)
}

pub fn parse_error_status(parameter: &str) -> Option<ErrorStatus> {
    let digits: Vec<u8> = parameter
        .trim()
        .chars()
        .map(|c| c.to_digit(10).filter(|d| *d <= 2).map(|d| d as u8))
        .collect::<Option<Vec<_>>>()?;

    if digits.len() != 6 {
        return None;
    }

    Some(ErrorStatus {
        fan: digits[0],
        lamp: digits[1],
        temperature: digits[2],
        cover_open: digits[3],
        filter: digits[4],
        other: digits[5],
    })
}

pub fn parse_lamp_status(parameter: &str) -> Option<Vec<LampStatus>> {
    let fields: Vec<&str> = parameter.split_whitespace().collect();
    if fields.is_empty() || fields.len() % 2 != 0 {
        return None;
    }

    fields
        .chunks(2)
        .map(|pair| {
            let hours = pair[0].parse::<u32>().ok()?;
            let is_on = match pair[1] {
                "0" => false,
                "1" => true,
                _ => return None,
            };
            Some(LampStatus { hours, is_on })
        })
        .collect()
}

pub fn av_mute_parameter(target: AvMuteTarget, muted: bool) -> String {
    format!("{}{}", target.wire_digit(), if muted { '1' } else { '0' })
}

pub fn parse_av_mute(parameter: &str) -> Option<AvMuteState> {
    let mut chars = parameter.trim().chars();
    let target = match chars.next()? {
        '1' => AvMuteTarget::Video,
        '2' => AvMuteTarget::Audio,
        '3' => AvMuteTarget::AudioVideo,
        _ => return None,
    };
    let muted = match chars.next()? {
        '0' => false,
        '1' => true,
        _ => return None,
    };
    chars.next().is_none().then_some(AvMuteState { target, muted })
}

/// Parses the class 2 search acknowledgement `%2ACKN=<MAC>` and returns the MAC.
pub fn parse_search_ack(line: &str) -> Option<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mac = line.strip_prefix("%2ACKN=")?;
    (!mac.is_empty()).then(|| mac.to_string())
}
