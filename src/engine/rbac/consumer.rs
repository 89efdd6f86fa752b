//! Consumer identity parsing for values like `consumer:42`

use std::num::ParseIntError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerIdError {
    #[error("invalid consumer username format, example: consumer:1")]
    InvalidFormat,
    #[error("invalid consumer id: {0}")]
    InvalidId(#[from] ParseIntError),
}

/// Extract the numeric principal ID from a `label:<integer>` value
pub fn extract_consumer_id(value: &str) -> Result<i64, ConsumerIdError> {
    let mut parts = value.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(id), None) => Ok(id.parse::<i64>()?),
        _ => Err(ConsumerIdError::InvalidFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_consumer() {
        assert_eq!(extract_consumer_id("consumer:1"), Ok(1));
        assert_eq!(extract_consumer_id("svc:90210"), Ok(90210));
    }

    #[test]
    fn test_wrong_segment_count() {
        assert_eq!(extract_consumer_id("consumer"), Err(ConsumerIdError::InvalidFormat));
        assert_eq!(extract_consumer_id("a:1:2"), Err(ConsumerIdError::InvalidFormat));
        assert_eq!(extract_consumer_id(""), Err(ConsumerIdError::InvalidFormat));
    }

    #[test]
    fn test_non_numeric_id() {
        assert!(matches!(extract_consumer_id("consumer:abc"), Err(ConsumerIdError::InvalidId(_))));
        assert!(matches!(extract_consumer_id("consumer:"), Err(ConsumerIdError::InvalidId(_))));
        assert!(matches!(extract_consumer_id("consumer: 7"), Err(ConsumerIdError::InvalidId(_))));
    }
}
