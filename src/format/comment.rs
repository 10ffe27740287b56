//! ICMT comment field extraction
//!
//! Recording comments open with `"Recorded at HH:MM:SS DD/MM/YYYY
//! (UTC[±H[:MM]])"` followed by free text that may carry a temperature
//! (`"23.4C"`) and a battery reading (`"4.2V"`, `"greater than 4.9V"`,
//! `"less than 2.5V"`).

use crate::util::time;
use regex::Regex;
use std::sync::OnceLock;

fn recorded_at_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"Recorded at (\d{2}:\d{2}:\d{2} \d{2}/\d{2}/\d{4}) \(UTC([-+]\d{1,2})?(?::(\d{2}))?\)",
        )
        .unwrap()
    })
}

fn temperature_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(-?\d+\.\d)C").unwrap())
}

fn voltage_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(greater than |less than )?(\d\.\d)V").unwrap())
}

/// Battery state as written in the comment
#[derive(Debug, Clone, PartialEq)]
pub enum BatteryReading {
    Exact(f64),
    GreaterThan(f64),
    LessThan(f64),
}

impl BatteryReading {
    /// Numeric value for reports
    pub fn volts(&self) -> f64 {
        match self {
            BatteryReading::Exact(v) => *v,
            BatteryReading::GreaterThan(v) => *v,
            BatteryReading::LessThan(v) => *v,
        }
    }
}

/// Fields recovered from a recording comment
#[derive(Debug, Clone, Default)]
pub struct CommentFields {
    /// `Recorded at` time as written (local), epoch milliseconds
    pub timestamp: Option<i64>,
    /// Timezone offset from the `(UTC…)` suffix, minutes
    pub timezone_minutes: i32,
    /// Temperature in °C
    pub temperature: Option<f64>,
    /// Battery voltage marker
    pub battery: Option<BatteryReading>,
}

impl CommentFields {
    /// Recording start converted to UTC epoch milliseconds
    pub fn timestamp_utc(&self) -> Option<i64> {
        self.timestamp
            .map(|ms| ms - self.timezone_minutes as i64 * 60_000)
    }
}

/// Extract the structured fields from an ICMT comment
pub fn parse(comment: &str) -> CommentFields {
    let mut fields = CommentFields::default();

    if let Some(caps) = recorded_at_regex().captures(comment) {
        fields.timestamp = time::parse_comment(&caps[1]);

        if let Some(hours) = caps.get(2) {
            let hours: i32 = hours.as_str().parse().unwrap_or(0);
            let minutes: i32 = caps
                .get(3)
                .map(|m| m.as_str().parse().unwrap_or(0))
                .unwrap_or(0);
            fields.timezone_minutes = hours * 60 + hours.signum() * minutes;
        }
    }

    if let Some(caps) = temperature_regex().captures(comment) {
        fields.temperature = caps[1].parse().ok();
    }

    if let Some(caps) = voltage_regex().captures(comment) {
        if let Ok(volts) = caps[2].parse::<f64>() {
            fields.battery = Some(match caps.get(1).map(|m| m.as_str()) {
                Some("greater than ") => BatteryReading::GreaterThan(volts),
                Some("less than ") => BatteryReading::LessThan(volts),
                _ => BatteryReading::Exact(volts),
            });
        }
    }

    fields
}

/// The `HH:MM:SS DD/MM/YYYY` fields of the comment, when present
pub fn recorded_at(comment: &str) -> Option<String> {
    recorded_at_regex()
        .captures(comment)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMENT: &str = "Recorded at 12:00:00 01/06/2024 (UTC) by AudioMoth 24F3190361DA63A5 \
         at medium gain while battery was 4.2V and temperature was 23.4C.";

    #[test]
    fn test_full_comment() {
        let fields = parse(COMMENT);
        assert_eq!(
            fields.timestamp,
            time::parse_compact("20240601_120000")
        );
        assert_eq!(fields.timezone_minutes, 0);
        assert_eq!(fields.temperature, Some(23.4));
        assert_eq!(fields.battery, Some(BatteryReading::Exact(4.2)));
        assert_eq!(fields.timestamp_utc(), fields.timestamp);
    }

    #[test]
    fn test_timezone_offsets() {
        let fields = parse("Recorded at 01:30:00 01/01/2023 (UTC+5:30) by AudioMoth X.");
        assert_eq!(fields.timezone_minutes, 330);
        let local = fields.timestamp.unwrap();
        assert_eq!(fields.timestamp_utc().unwrap(), local - 330 * 60_000);

        let fields = parse("Recorded at 01:30:00 01/01/2023 (UTC-4) by AudioMoth X.");
        assert_eq!(fields.timezone_minutes, -240);

        let fields = parse("Recorded at 01:30:00 01/01/2023 (UTC-3:30) by AudioMoth X.");
        assert_eq!(fields.timezone_minutes, -210);
    }

    #[test]
    fn test_battery_markers() {
        let fields = parse("battery was greater than 4.9V");
        assert_eq!(fields.battery, Some(BatteryReading::GreaterThan(4.9)));

        let fields = parse("battery was less than 2.5V");
        assert_eq!(fields.battery, Some(BatteryReading::LessThan(2.5)));
    }

    #[test]
    fn test_missing_fields() {
        let fields = parse("no structured data here");
        assert!(fields.timestamp.is_none());
        assert!(fields.temperature.is_none());
        assert!(fields.battery.is_none());
    }

    #[test]
    fn test_recorded_at_extraction() {
        assert_eq!(
            recorded_at(COMMENT).unwrap(),
            "12:00:00 01/06/2024"
        );
        assert!(recorded_at("junk").is_none());
    }
}
