use crate::utils::error::{PjlinkError, Result};
use std::net::Ipv4Addr;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_ip_address(field_name: &str, address: &str) -> Result<Ipv4Addr> {
    if address.trim().is_empty() {
        return Err(PjlinkError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: address.to_string(),
            reason: "IP address cannot be empty".to_string(),
        });
    }

    address
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|e| PjlinkError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: address.to_string(),
            reason: format!("Invalid IPv4 address: {}", e),
        })
}

pub fn validate_port(field_name: &str, port: u16) -> Result<()> {
    if port == 0 {
        return Err(PjlinkError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: port.to_string(),
            reason: "Port must be between 1 and 65535".to_string(),
        });
    }
    Ok(())
}

/// Accepts only contiguous masks that leave room for at least one host.
pub fn validate_subnet_mask(field_name: &str, mask: Ipv4Addr) -> Result<()> {
    let bits = u32::from(mask);
    let contiguous = bits.leading_ones() + bits.trailing_zeros() == 32;
    if bits == 0 || !contiguous || bits.trailing_zeros() < 2 {
        return Err(PjlinkError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: mask.to_string(),
            reason: "Subnet mask must be contiguous and leave at least two host bits".to_string(),
        });
    }
    Ok(())
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(PjlinkError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(PjlinkError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(PjlinkError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| PjlinkError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PjlinkError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(PjlinkError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}
