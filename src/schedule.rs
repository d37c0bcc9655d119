use std::{fmt, str::FromStr};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Schedule `{0}` must be wrapped in cron(...) or rate(...)")]
    Syntax(String),

    #[error("cron expression needs 6 fields, got {0}")]
    FieldCount(usize),

    #[error("Invalid {field} value `{value}`")]
    InvalidField { field: &'static str, value: String },

    #[error("{field} value {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("Exactly one of day-of-month and day-of-week must be `?`")]
    DayConflict,

    #[error("Invalid rate `{0}`")]
    InvalidRate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
    Year,
}

impl Unit {
    fn label(&self) -> &'static str {
        return match self {
            Unit::Minute => "minute",
            Unit::Hour => "hour",
            Unit::DayOfMonth => "day-of-month",
            Unit::Month => "month",
            Unit::DayOfWeek => "day-of-week",
            Unit::Year => "year",
        };
    }

    fn bounds(&self) -> (u32, u32) {
        return match self {
            Unit::Minute => (0, 59),
            Unit::Hour => (0, 23),
            Unit::DayOfMonth => (1, 31),
            Unit::Month => (1, 12),
            Unit::DayOfWeek => (1, 7),
            Unit::Year => (1970, 2199),
        };
    }

    fn names(&self) -> &'static [&'static str] {
        return match self {
            Unit::Month => &[
                "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
            ],
            Unit::DayOfWeek => &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
            _ => &[],
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// `*`
    Every,
    /// `?`, only valid for the two day fields.
    Unspecified,
    /// `a/b` or `*/b`
    Step { start: Option<u32>, step: u32 },
    /// `a-b/c`
    SteppedRange { from: u32, to: u32, step: u32 },
    /// `a-b`
    Range { from: u32, to: u32 },
    /// `a` or `a,b,c`
    Values(Vec<u32>),
    /// `L` in day-of-month.
    LastDayOfMonth,
    /// `LW` in day-of-month.
    LastWeekdayOfMonth,
    /// `aW` in day-of-month: the weekday closest to day `a`.
    NearestWeekday(u32),
    /// `aL` in day-of-week: the last such weekday of the month.
    LastDayOfWeek(u32),
    /// `a#n` in day-of-week: the `n`th such weekday of the month.
    NthDayOfWeek { day: u32, nth: u32 },
}

impl Field {
    fn parse(raw: &str, unit: Unit) -> Result<Self, Error> {
        let invalid = || Error::InvalidField {
            field: unit.label(),
            value: raw.to_string(),
        };

        match raw {
            "*" => return Ok(Field::Every),
            "?" => {
                return match unit {
                    Unit::DayOfMonth | Unit::DayOfWeek => Ok(Field::Unspecified),
                    _ => Err(invalid()),
                }
            }
            _ => {}
        }

        let upper = raw.to_ascii_uppercase();
        match unit {
            Unit::DayOfMonth => {
                if upper == "L" {
                    return Ok(Field::LastDayOfMonth);
                }
                if upper == "LW" {
                    return Ok(Field::LastWeekdayOfMonth);
                }
                if let Some(day) = upper.strip_suffix('W') {
                    return Ok(Field::NearestWeekday(parse_value(day, unit)?));
                }
            }
            Unit::DayOfWeek => {
                if upper == "L" {
                    return Ok(Field::Values(vec![7]));
                }
                if let Some((day, nth)) = upper.split_once('#') {
                    let day = parse_value(day, unit)?;
                    let nth: u32 = nth.parse().map_err(|_| invalid())?;
                    if !(1..=5).contains(&nth) {
                        return Err(invalid());
                    }
                    return Ok(Field::NthDayOfWeek { day, nth });
                }
                if let Some(day) = upper.strip_suffix('L') {
                    return Ok(Field::LastDayOfWeek(parse_value(day, unit)?));
                }
            }
            _ => {}
        }

        if let Some((start, step)) = raw.split_once('/') {
            let step: u32 = step.parse().map_err(|_| invalid())?;
            if step == 0 {
                return Err(invalid());
            }
            if start == "*" {
                return Ok(Field::Step { start: None, step });
            }
            if let Some((from, to)) = parse_range(start, unit)? {
                return Ok(Field::SteppedRange { from, to, step });
            }
            let start = parse_value(start, unit).map_err(|_| invalid())?;
            return Ok(Field::Step {
                start: Some(start),
                step,
            });
        }

        if let Some((from, to)) = parse_range(raw, unit)? {
            return Ok(Field::Range { from, to });
        }

        let values = raw
            .split(',')
            .map(|value| parse_value(value, unit))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Field::Values(values));
    }

    fn is_open(&self) -> bool {
        return matches!(self, Field::Every | Field::Unspecified);
    }
}

fn parse_range(raw: &str, unit: Unit) -> Result<Option<(u32, u32)>, Error> {
    let Some((from, to)) = raw.split_once('-') else {
        return Ok(None);
    };
    let from = parse_value(from, unit)?;
    let to = parse_value(to, unit)?;
    if from > to {
        return Err(Error::InvalidField {
            field: unit.label(),
            value: raw.to_string(),
        });
    }

    return Ok(Some((from, to)));
}

fn parse_value(raw: &str, unit: Unit) -> Result<u32, Error> {
    let upper = raw.to_ascii_uppercase();
    if let Some(index) = unit.names().iter().position(|name| *name == upper) {
        return Ok(index as u32 + 1);
    }

    let value: u32 = raw.parse().map_err(|_| Error::InvalidField {
        field: unit.label(),
        value: raw.to_string(),
    })?;
    let (min, max) = unit.bounds();
    if value < min || value > max {
        return Err(Error::OutOfRange {
            field: unit.label(),
            value,
            min,
            max,
        });
    }

    return Ok(value);
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            Field::Every => f.write_str("*"),
            Field::Unspecified => f.write_str("?"),
            Field::Step { start: None, step } => write!(f, "*/{step}"),
            Field::Step {
                start: Some(start),
                step,
            } => write!(f, "{start}/{step}"),
            Field::SteppedRange { from, to, step } => write!(f, "{from}-{to}/{step}"),
            Field::Range { from, to } => write!(f, "{from}-{to}"),
            Field::Values(values) => f.write_str(&join(values)),
            Field::LastDayOfMonth => f.write_str("L"),
            Field::LastWeekdayOfMonth => f.write_str("LW"),
            Field::NearestWeekday(day) => write!(f, "{day}W"),
            Field::LastDayOfWeek(day) => write!(f, "{day}L"),
            Field::NthDayOfWeek { day, nth } => write!(f, "{day}#{nth}"),
        };
    }
}

fn join(values: &[u32]) -> String {
    return values
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
}

/// Six-field cron in the form the AWS schedulers accept:
/// `minutes hours day-of-month month day-of-week year`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cron {
    pub minutes: Field,
    pub hours: Field,
    pub day_of_month: Field,
    pub month: Field,
    pub day_of_week: Field,
    pub year: Field,
}

impl Cron {
    fn parse(body: &str) -> Result<Self, Error> {
        let fields: Vec<&str> = body.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(Error::FieldCount(fields.len()));
        }

        let cron = Cron {
            minutes: Field::parse(fields[0], Unit::Minute)?,
            hours: Field::parse(fields[1], Unit::Hour)?,
            day_of_month: Field::parse(fields[2], Unit::DayOfMonth)?,
            month: Field::parse(fields[3], Unit::Month)?,
            day_of_week: Field::parse(fields[4], Unit::DayOfWeek)?,
            year: Field::parse(fields[5], Unit::Year)?,
        };

        let dom_unspecified = cron.day_of_month == Field::Unspecified;
        let dow_unspecified = cron.day_of_week == Field::Unspecified;
        if dom_unspecified == dow_unspecified {
            return Err(Error::DayConflict);
        }

        return Ok(cron);
    }

    pub fn describe(&self) -> String {
        let mut parts = vec![
            describe_clock(&self.minutes, "minute"),
            describe_clock(&self.hours, "hour"),
            self.describe_days(),
        ];

        if !self.month.is_open() {
            parts.push(format!("in month {}", describe_list(&self.month)));
        }
        if !self.year.is_open() {
            parts.push(format!("in year {}", describe_list(&self.year)));
        }

        return parts.join(", ");
    }

    fn describe_days(&self) -> String {
        if self.day_of_month.is_open() && self.day_of_week.is_open() {
            return String::from("every day");
        }
        if !self.day_of_week.is_open() {
            let names = Unit::DayOfWeek.names();
            let day = |value: u32| names[(value - 1) as usize].to_string();
            return match &self.day_of_week {
                Field::Values(values) => format!(
                    "on {}",
                    values.iter().map(|v| day(*v)).collect::<Vec<_>>().join(", ")
                ),
                Field::Range { from, to } => format!("from {} through {}", day(*from), day(*to)),
                Field::LastDayOfWeek(value) => format!("on the last {} of the month", day(*value)),
                Field::NthDayOfWeek { day: value, nth } => {
                    format!("on the {} {} of the month", ordinal(*nth), day(*value))
                }
                other => format!("on day-of-week {other}"),
            };
        }

        return match &self.day_of_month {
            Field::Step { step, .. } => format!("every {step} days"),
            Field::SteppedRange { from, to, step } => {
                format!("every {step} days from day {from} through {to}")
            }
            Field::LastDayOfMonth => String::from("on the last day of the month"),
            Field::LastWeekdayOfMonth => String::from("on the last weekday of the month"),
            Field::NearestWeekday(day) => {
                format!("on the weekday nearest day {day} of the month")
            }
            other => format!("on day {} of the month", describe_list(other)),
        };
    }
}

fn describe_clock(field: &Field, unit: &str) -> String {
    return match field {
        Field::Every | Field::Unspecified => format!("every {unit}"),
        Field::Step { start, step } => match start {
            None | Some(0) => format!("every {step} {unit}s"),
            Some(start) => format!("every {step} {unit}s starting at {unit} {start}"),
        },
        Field::SteppedRange { from, to, step } => {
            format!("every {step} {unit}s from {from} through {to}")
        }
        Field::Range { from, to } => format!("every {unit} from {from} through {to}"),
        Field::Values(values) if values.len() == 1 => format!("at {unit} {}", values[0]),
        Field::Values(values) => format!("at {unit}s {}", join(values)),
        other => format!("at {unit} {other}"),
    };
}

fn ordinal(nth: u32) -> &'static str {
    return match nth {
        1 => "first",
        2 => "second",
        3 => "third",
        4 => "fourth",
        _ => "fifth",
    };
}

fn describe_list(field: &Field) -> String {
    return match field {
        Field::Values(values) => join(values),
        other => other.to_string(),
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    Minutes,
    Hours,
    Days,
}

impl RateUnit {
    fn label(&self, value: u32) -> &'static str {
        return match (self, value) {
            (RateUnit::Minutes, 1) => "minute",
            (RateUnit::Minutes, _) => "minutes",
            (RateUnit::Hours, 1) => "hour",
            (RateUnit::Hours, _) => "hours",
            (RateUnit::Days, 1) => "day",
            (RateUnit::Days, _) => "days",
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleExpression {
    Cron(Cron),
    Rate { value: u32, unit: RateUnit },
}

impl ScheduleExpression {
    pub fn describe(&self) -> String {
        return match self {
            ScheduleExpression::Cron(cron) => cron.describe(),
            ScheduleExpression::Rate { value: 1, unit } => format!("every {}", unit.label(1)),
            ScheduleExpression::Rate { value, unit } => {
                format!("every {value} {}", unit.label(*value))
            }
        };
    }
}

impl FromStr for ScheduleExpression {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if let Some(body) = raw.strip_prefix("cron(").and_then(|b| b.strip_suffix(')')) {
            return Ok(ScheduleExpression::Cron(Cron::parse(body)?));
        }
        if let Some(body) = raw.strip_prefix("rate(").and_then(|b| b.strip_suffix(')')) {
            return parse_rate(body);
        }

        return Err(Error::Syntax(raw.to_string()));
    }
}

fn parse_rate(body: &str) -> Result<ScheduleExpression, Error> {
    let invalid = || Error::InvalidRate(body.to_string());
    let (value, unit) = body.trim().split_once(' ').ok_or_else(invalid)?;
    let value: u32 = value.parse().map_err(|_| invalid())?;
    let unit = match (value, unit.trim()) {
        (0, _) => return Err(invalid()),
        (1, "minute") => RateUnit::Minutes,
        (1, "hour") => RateUnit::Hours,
        (1, "day") => RateUnit::Days,
        (1, _) => return Err(invalid()),
        (_, "minutes") => RateUnit::Minutes,
        (_, "hours") => RateUnit::Hours,
        (_, "days") => RateUnit::Days,
        _ => return Err(invalid()),
    };

    return Ok(ScheduleExpression::Rate { value, unit });
}

impl fmt::Display for ScheduleExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            ScheduleExpression::Cron(cron) => write!(
                f,
                "cron({} {} {} {} {} {})",
                cron.minutes, cron.hours, cron.day_of_month, cron.month, cron.day_of_week, cron.year
            ),
            ScheduleExpression::Rate { value, unit } => {
                write!(f, "rate({value} {})", unit.label(*value))
            }
        };
    }
}
