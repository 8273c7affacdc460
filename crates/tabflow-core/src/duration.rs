//! ISO-8601 durations (`PnYnMnWnDTnHnMnS`) carried as row values.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A calendar-aware duration kept component-wise, so that a parsed value is
/// re-emitted exactly as it was read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IsoDuration {
    pub negative: bool,
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: f64,
}

impl IsoDuration {
    pub fn from_seconds(total: i64) -> Self {
        let negative = total < 0;
        let mut rest = total.unsigned_abs();
        let days = rest / 86_400;
        rest %= 86_400;
        let hours = rest / 3_600;
        rest %= 3_600;
        let minutes = rest / 60;
        let seconds = rest % 60;
        Self {
            negative,
            days: days as u32,
            hours: hours as u32,
            minutes: minutes as u32,
            seconds: seconds as f64,
            ..Self::default()
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let bad = || Error::config(format!("invalid ISO-8601 duration '{s}'"));

        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let body = body.strip_prefix('P').ok_or_else(bad)?;
        if body.is_empty() {
            return Err(bad());
        }

        let mut out = IsoDuration {
            negative,
            ..Self::default()
        };
        let mut in_time = false;
        let mut number = String::new();
        let mut seen_component = false;

        for ch in body.chars() {
            match ch {
                'T' => {
                    if in_time || !number.is_empty() {
                        return Err(bad());
                    }
                    in_time = true;
                }
                '0'..='9' | '.' | ',' => number.push(if ch == ',' { '.' } else { ch }),
                unit => {
                    if number.is_empty() {
                        return Err(bad());
                    }
                    seen_component = true;
                    if in_time && unit == 'S' {
                        out.seconds = number.parse::<f64>().map_err(|_| bad())?;
                    } else {
                        let n = number.parse::<u32>().map_err(|_| bad())?;
                        match (in_time, unit) {
                            (false, 'Y') => out.years = n,
                            (false, 'M') => out.months = n,
                            (false, 'W') => out.weeks = n,
                            (false, 'D') => out.days = n,
                            (true, 'H') => out.hours = n,
                            (true, 'M') => out.minutes = n,
                            _ => return Err(bad()),
                        }
                    }
                    number.clear();
                }
            }
        }

        if !number.is_empty() || !seen_component {
            return Err(bad());
        }
        Ok(out)
    }

    fn has_time(&self) -> bool {
        self.hours != 0 || self.minutes != 0 || self.seconds != 0.0
    }

    fn has_date(&self) -> bool {
        self.years != 0 || self.months != 0 || self.weeks != 0 || self.days != 0
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str("P")?;
        if !self.has_date() && !self.has_time() {
            return f.write_str("0D");
        }
        for (n, unit) in [
            (self.years, 'Y'),
            (self.months, 'M'),
            (self.weeks, 'W'),
            (self.days, 'D'),
        ] {
            if n != 0 {
                write!(f, "{n}{unit}")?;
            }
        }
        if self.has_time() {
            f.write_str("T")?;
            if self.hours != 0 {
                write!(f, "{}H", self.hours)?;
            }
            if self.minutes != 0 {
                write!(f, "{}M", self.minutes)?;
            }
            if self.seconds != 0.0 {
                write!(f, "{}S", self.seconds)?;
            }
        }
        Ok(())
    }
}

impl FromStr for IsoDuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_components() {
        let d = IsoDuration::parse("P1Y2M3DT4H5M6.5S").unwrap();
        assert_eq!(d.years, 1);
        assert_eq!(d.months, 2);
        assert_eq!(d.days, 3);
        assert_eq!(d.hours, 4);
        assert_eq!(d.minutes, 5);
        assert_eq!(d.seconds, 6.5);
        assert_eq!(d.to_string(), "P1Y2M3DT4H5M6.5S");
    }

    #[test]
    fn month_and_minute_are_distinguished() {
        let d = IsoDuration::parse("P1MT1M").unwrap();
        assert_eq!(d.months, 1);
        assert_eq!(d.minutes, 1);
    }

    #[test]
    fn zero_and_negative() {
        assert_eq!(IsoDuration::default().to_string(), "P0D");
        let d = IsoDuration::from_seconds(-3_661);
        assert_eq!(d.to_string(), "-PT1H1M1S");
        assert_eq!(IsoDuration::parse("-PT1H1M1S").unwrap(), d);
    }

    #[test]
    fn rejects_garbage() {
        assert!(IsoDuration::parse("1D").is_err());
        assert!(IsoDuration::parse("P").is_err());
        assert!(IsoDuration::parse("PT5").is_err());
        assert!(IsoDuration::parse("P5H").is_err());
    }
}
