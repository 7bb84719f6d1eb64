use super::types::{DeviceResponse, ParsedLine, SensorRecord};

/// Sensor reading, long form: DATA:<temperature>,<humidity>
pub const DATA_PREFIX: &str = "DATA:";
/// Sensor reading, compact form sent by newer firmware: D:<temperature>,<humidity>
pub const DATA_SHORT_PREFIX: &str = "D:";
/// Acknowledgement or debug text: RESP:<text>
pub const RESPONSE_PREFIX: &str = "RESP:";

/// Classify and decode one line received from the device.
///
/// Malformed readings come back as [`ParsedLine::Unrecognized`]; nothing here
/// fails or panics.
pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim();
    if line.is_empty() {
        return ParsedLine::Empty;
    }

    // "DATA:" is checked before "D:" so the longer prefix wins
    let payload = line
        .strip_prefix(DATA_PREFIX)
        .or_else(|| line.strip_prefix(DATA_SHORT_PREFIX));
    if let Some(payload) = payload {
        return match parse_reading(payload) {
            Some((temperature, humidity)) => ParsedLine::Sensor(SensorRecord::new(temperature, humidity)),
            None => {
                log::debug!("Discarding malformed reading: {}", line);
                ParsedLine::Unrecognized(line.to_string())
            }
        };
    }

    if let Some(text) = line.strip_prefix(RESPONSE_PREFIX) {
        return ParsedLine::Response(DeviceResponse::new(text));
    }

    log::debug!("Unrecognized line: {}", line);
    ParsedLine::Unrecognized(line.to_string())
}

/// Parse "<temperature>,<humidity>"; both fields must be finite numbers
fn parse_reading(payload: &str) -> Option<(f64, f64)> {
    let parts: Vec<&str> = payload.split(',').collect();
    if parts.len() != 2 {
        return None;
    }
    let temperature = parts[0].trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    let humidity = parts[1].trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some((temperature, humidity))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(line: &str) -> (f64, f64) {
        match parse_line(line) {
            ParsedLine::Sensor(record) => (record.temperature, record.humidity),
            other => panic!("expected a reading for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_parse_long_and_short_data() {
        assert_eq!(reading("DATA:23.5,61.2"), (23.5, 61.2));
        assert_eq!(reading("D:23.5,61.2"), (23.5, 61.2));
    }

    #[test]
    fn test_parse_tolerates_field_whitespace() {
        assert_eq!(reading("D: -4.0 , 99.9"), (-4.0, 99.9));
    }

    #[test]
    fn test_non_numeric_field_is_unrecognized() {
        assert!(matches!(parse_line("DATA:abc,61.2"), ParsedLine::Unrecognized(_)));
        assert!(matches!(parse_line("D:23.5,"), ParsedLine::Unrecognized(_)));
    }

    #[test]
    fn test_non_finite_values_are_unrecognized() {
        for line in ["D:nan,40", "D:inf,1", "DATA:20.0,-inf", "D:NaN,NaN"] {
            assert!(
                matches!(parse_line(line), ParsedLine::Unrecognized(_)),
                "{} should not parse as a reading",
                line
            );
        }
    }

    #[test]
    fn test_wrong_field_count_is_unrecognized() {
        assert!(matches!(parse_line("DATA:23.5"), ParsedLine::Unrecognized(_)));
        assert!(matches!(parse_line("D:1,2,3"), ParsedLine::Unrecognized(_)));
    }

    #[test]
    fn test_parse_response() {
        match parse_line("RESP:ready") {
            ParsedLine::Response(resp) => assert_eq!(resp.text, "ready"),
            other => panic!("wrong variant: {:?}", other),
        }
        match parse_line("RESP:") {
            ParsedLine::Response(resp) => assert_eq!(resp.text, ""),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_empty_and_unknown_lines() {
        assert_eq!(parse_line(""), ParsedLine::Empty);
        assert_eq!(parse_line("   "), ParsedLine::Empty);
        assert_eq!(parse_line("Hello from PC!"), ParsedLine::Unrecognized("Hello from PC!".into()));
        assert!(parse_line("Hello").into_inbound().is_none());
    }

    #[test]
    fn test_prefixes_are_case_sensitive() {
        assert!(matches!(parse_line("data:1.0,2.0"), ParsedLine::Unrecognized(_)));
    }
}
