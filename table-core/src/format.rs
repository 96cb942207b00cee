//! format.rs – renders cells the way a spreadsheet displays them.
//!
//! `DataFormatter` is a plain value: it carries the locale and nothing else,
//! so callers pass it explicitly to whatever reads cells.

use std::{fmt, str::FromStr};

use anyhow::{Result, bail};
use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};

use crate::{Cell, CellType, style::Styles};

/* ========================== LOCALE ========================================= */

/// Separators used when rendering numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locale {
    tag: &'static str,
    pub decimal: char,
    pub group: char,
}

impl Locale {
    pub const EN_US: Locale = Locale { tag: "en-US", decimal: '.', group: ',' };
    pub const JA_JP: Locale = Locale { tag: "ja-JP", decimal: '.', group: ',' };
    pub const DE_DE: Locale = Locale { tag: "de-DE", decimal: ',', group: '.' };
    pub const FR_FR: Locale = Locale { tag: "fr-FR", decimal: ',', group: '\u{a0}' };
}

impl Default for Locale {
    fn default() -> Self {
        Locale::EN_US
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag)
    }
}

impl FromStr for Locale {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.replace('_', "-").to_ascii_lowercase().as_str() {
            "en" | "en-us" => Locale::EN_US,
            "ja" | "ja-jp" => Locale::JA_JP,
            "de" | "de-de" => Locale::DE_DE,
            "fr" | "fr-fr" => Locale::FR_FR,
            _ => bail!("Unknown locale: {s}"),
        })
    }
}

/* ========================== FORMATTER ====================================== */

#[derive(Debug, Clone, Copy, Default)]
pub struct DataFormatter {
    locale: Locale,
}

impl DataFormatter {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Display text of a cell; an absent cell renders as `""`.
    ///
    /// Formula cells render their cached result, or the formula text when the
    /// workbook carries no cached value.
    pub fn format_cell(&self, cell: Option<&Cell>, styles: &Styles) -> String {
        let Some(cell) = cell else {
            return String::new();
        };
        if cell.kind == CellType::Formula && cell.result == CellType::Blank {
            return cell.formula.clone().unwrap_or_default();
        }
        match cell.result {
            CellType::Blank => String::new(),
            CellType::Boolean => {
                let v = cell.value.trim();
                let truthy = v == "1" || v.eq_ignore_ascii_case("true");
                (if truthy { "TRUE" } else { "FALSE" }).to_owned()
            }
            CellType::Numeric => match cell.value.trim().parse::<f64>() {
                Ok(v) => self.format_number(v, styles.format_code(cell.style), styles.date1904),
                Err(_) => cell.value.clone(),
            },
            CellType::Text | CellType::Error | CellType::Formula => cell.value.clone(),
        }
    }

    /// Renders `value` with a number format code.
    pub fn format_number(&self, value: f64, code: &str, date1904: bool) -> String {
        let sections = split_sections(code);
        let (section, value, auto_minus) = if value < 0.0 && sections.len() >= 2 {
            (sections[1], -value, false)
        } else if value == 0.0 && sections.len() >= 3 {
            (sections[2], value, false)
        } else {
            (sections[0], value, value < 0.0)
        };

        let tokens = tokenize(section);
        let body = if tokens.iter().any(|t| matches!(t, Tok::Date(_))) {
            match serial_to_datetime(value, date1904) {
                Some(dt) => return self.render_date(&tokens, dt, value),
                None => return self.general(value),
            }
        } else if tokens.is_empty()
            || (tokens.iter().any(|t| matches!(t, Tok::General | Tok::Text))
                && !tokens.iter().any(|t| matches!(t, Tok::Digit(_))))
        {
            let rendered = self.general(value.abs());
            self.render_literals(&tokens, &rendered)
        } else {
            self.render_number(&tokens, value.abs())
        };

        if auto_minus && body.chars().any(|c| c.is_ascii_digit() && c != '0') {
            format!("-{body}")
        } else {
            body
        }
    }

    /// Excel's `General`: integers as-is, otherwise up to ten significant
    /// digits, scientific notation for very large or very small magnitudes.
    fn general(&self, value: f64) -> String {
        if value == 0.0 {
            return "0".to_owned();
        }
        let abs = value.abs();
        let s = if !(1e-9..1e11).contains(&abs) {
            let s = format!("{value:.5E}");
            match s.split_once('E') {
                Some((mantissa, exp)) => {
                    let exp: i32 = exp.parse().unwrap_or(0);
                    format!(
                        "{}E{}{:02}",
                        trim_fraction(mantissa),
                        if exp < 0 { '-' } else { '+' },
                        exp.abs()
                    )
                }
                None => s,
            }
        } else if value.fract() == 0.0 {
            format!("{value:.0}")
        } else {
            let int_digits = (abs.log10().floor() as i32 + 1).max(1);
            let decimals = (10 - int_digits).max(0) as usize;
            trim_fraction(&format!("{value:.decimals$}"))
        };
        s.replace('.', &self.locale.decimal.to_string())
    }

    /// Literal tokens around a pre-rendered value (`General`, `@` sections).
    fn render_literals(&self, tokens: &[Tok], rendered: &str) -> String {
        let mut out = String::new();
        let mut placed = false;
        for t in tokens {
            match t {
                Tok::Lit(s) => out.push_str(s),
                Tok::General | Tok::Text if !placed => {
                    out.push_str(rendered);
                    placed = true;
                }
                _ => {}
            }
        }
        if !placed {
            out.push_str(rendered);
        }
        out
    }

    fn render_number(&self, tokens: &[Tok], mut value: f64) -> String {
        let first = tokens.iter().position(Tok::is_numeric_part);
        let last = tokens.iter().rposition(|t| matches!(t, Tok::Digit(_)));
        let (Some(first), Some(last)) = (first, last) else {
            // no placeholders: the section is pure text
            let mut out = String::new();
            for t in tokens {
                push_literal(&mut out, t);
            }
            return out;
        };

        let percents = tokens.iter().filter(|t| matches!(t, Tok::Percent)).count();
        value *= 100f64.powi(percents as i32);

        // trailing commas after the last digit scale by 1000 each
        let scale_commas = tokens[last + 1..]
            .iter()
            .take_while(|t| matches!(t, Tok::Comma))
            .count();

        let block = &tokens[first..=last];
        let number = match block.iter().position(|t| matches!(t, Tok::Exp(_))) {
            Some(exp_at) => self.render_scientific(block, exp_at, value),
            None => self.render_fixed(block, value / 1000f64.powi(scale_commas as i32)),
        };

        let mut out = String::new();
        for t in &tokens[..first] {
            push_literal(&mut out, t);
        }
        out.push_str(&number);
        for t in &tokens[last + 1 + scale_commas..] {
            push_literal(&mut out, t);
        }
        out
    }

    fn render_fixed(&self, block: &[Tok], value: f64) -> String {
        let point = block.iter().position(|t| matches!(t, Tok::Point));
        let (int_part, frac_part) = match point {
            Some(p) => (&block[..p], &block[p + 1..]),
            None => (block, &block[..0]),
        };
        let min_int = int_part.iter().filter(|t| matches!(t, Tok::Digit('0'))).count();
        let grouping = int_part.windows(2).any(|w| matches!(w, [Tok::Comma, Tok::Digit(_)]));
        let max_dec = frac_part.iter().filter(|t| matches!(t, Tok::Digit(_))).count();
        let min_dec = frac_part.iter().filter(|t| matches!(t, Tok::Digit('0'))).count();

        let rendered = format!("{value:.max_dec$}");
        let (int_digits, frac_digits) = rendered.split_once('.').unwrap_or((rendered.as_str(), ""));

        let mut int_digits = int_digits.trim_start_matches('0').to_owned();
        while int_digits.len() < min_int {
            int_digits.insert(0, '0');
        }
        if grouping {
            int_digits = group_thousands(&int_digits, self.locale.group);
        }

        let mut frac = frac_digits.to_owned();
        while frac.len() > min_dec && frac.ends_with('0') {
            frac.pop();
        }

        let mut out = int_digits;
        if point.is_some() {
            out.push(self.locale.decimal);
            out.push_str(&frac);
        }
        out
    }

    fn render_scientific(&self, block: &[Tok], exp_at: usize, value: f64) -> String {
        let mantissa = &block[..exp_at];
        let decimals = match mantissa.iter().position(|t| matches!(t, Tok::Point)) {
            Some(p) => mantissa[p + 1..].iter().filter(|t| matches!(t, Tok::Digit(_))).count(),
            None => 0,
        };
        let exp_digits = block[exp_at + 1..]
            .iter()
            .filter(|t| matches!(t, Tok::Digit(_)))
            .count()
            .max(1);
        let always_sign = matches!(&block[exp_at], Tok::Exp(sign) if sign == "+");

        let s = format!("{value:.decimals$E}");
        let Some((m, e)) = s.split_once('E') else {
            return s;
        };
        let exp: i32 = e.parse().unwrap_or(0);
        let sign = if exp < 0 {
            "-"
        } else if always_sign {
            "+"
        } else {
            ""
        };
        format!(
            "{}E{sign}{:0width$}",
            m.replace('.', &self.locale.decimal.to_string()),
            exp.abs(),
            width = exp_digits
        )
    }

    fn render_date(&self, tokens: &[Tok], dt: NaiveDateTime, serial: f64) -> String {
        let twelve_hour = tokens.iter().any(|t| matches!(t, Tok::Date(d) if d.starts_with("am") || d.starts_with("a/")));
        let has_fraction = tokens.windows(2).any(|w| matches!(w, [Tok::Point, Tok::Digit(_)]));
        let dt = if has_fraction { dt } else { round_to_second(dt) };

        let minutes_at = minute_positions(tokens);
        let mut out = String::new();
        let mut i = 0;
        while i < tokens.len() {
            match &tokens[i] {
                Tok::Date(d) => out.push_str(&date_part(d, dt, serial, twelve_hour, minutes_at.contains(&i))),
                Tok::Point if has_fraction => {
                    let digits = tokens[i + 1..]
                        .iter()
                        .take_while(|t| matches!(t, Tok::Digit(_)))
                        .count();
                    let frac = f64::from(dt.nanosecond()) / 1e9;
                    let rendered = format!("{frac:.digits$}");
                    out.push(self.locale.decimal);
                    out.push_str(rendered.split_once('.').map(|(_, f)| f).unwrap_or(""));
                    i += digits;
                }
                t => push_literal(&mut out, t),
            }
            i += 1;
        }
        out
    }
}

/* ========================== TOKENS ========================================= */

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Lit(String),
    /// `0`, `#` or `?`
    Digit(char),
    Point,
    Comma,
    Percent,
    /// `E+` / `E-`
    Exp(String),
    /// Lower-cased run of a date/time letter, `am/pm`, `a/p`, or `[h]`-style elapsed time.
    Date(String),
    General,
    Text,
}

impl Tok {
    fn is_numeric_part(&self) -> bool {
        matches!(self, Tok::Digit(_) | Tok::Point | Tok::Comma)
    }
}

fn push_literal(out: &mut String, t: &Tok) {
    match t {
        Tok::Lit(s) => out.push_str(s),
        Tok::Percent => out.push('%'),
        Tok::Point => out.push('.'),
        Tok::Comma => out.push(','),
        _ => {}
    }
}

/// Splits on `;` outside quotes, escapes and brackets.
fn split_sections(code: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut start = 0;
    let mut in_quote = false;
    let mut in_bracket = false;
    let mut escaped = false;
    for (i, c) in code.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if !in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            '[' if !in_quote => in_bracket = true,
            ']' if !in_quote => in_bracket = false,
            ';' if !in_quote && !in_bracket => {
                sections.push(&code[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    sections.push(&code[start..]);
    sections
}

fn tokenize(section: &str) -> Vec<Tok> {
    let chars: Vec<char> = section.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let starts_with = |i: usize, word: &str| {
        let w: Vec<char> = word.chars().collect();
        chars.len() >= i + w.len()
            && chars[i..i + w.len()]
                .iter()
                .zip(&w)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                let end = chars[i + 1..].iter().position(|&ch| ch == '"').map_or(chars.len(), |p| i + 1 + p);
                out.push(Tok::Lit(chars[i + 1..end].iter().collect()));
                i = end + 1;
                continue;
            }
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(Tok::Lit(next.to_string()));
                }
                i += 2;
                continue;
            }
            '_' => {
                out.push(Tok::Lit(" ".to_owned()));
                i += 2;
                continue;
            }
            '*' => {
                i += 2;
                continue;
            }
            '[' => {
                let end = chars[i + 1..].iter().position(|&ch| ch == ']').map_or(chars.len(), |p| i + 1 + p);
                let inner: String = chars[i + 1..end].iter().collect();
                let lower = inner.to_ascii_lowercase();
                if !lower.is_empty() && lower.chars().all(|ch| matches!(ch, 'h' | 'm' | 's')) {
                    out.push(Tok::Date(format!("[{lower}]")));
                } else if let Some(currency) = inner.strip_prefix('$') {
                    // [$€-407] → "€"
                    let symbol = currency.split('-').next().unwrap_or("");
                    if !symbol.is_empty() {
                        out.push(Tok::Lit(symbol.to_owned()));
                    }
                }
                i = end + 1;
                continue;
            }
            _ if starts_with(i, "General") => {
                out.push(Tok::General);
                i += "General".len();
                continue;
            }
            _ if starts_with(i, "AM/PM") => {
                out.push(Tok::Date("am/pm".to_owned()));
                i += 5;
                continue;
            }
            _ if starts_with(i, "A/P") => {
                out.push(Tok::Date("a/p".to_owned()));
                i += 3;
                continue;
            }
            '0' | '#' | '?' => out.push(Tok::Digit(c)),
            '.' => out.push(Tok::Point),
            ',' => out.push(Tok::Comma),
            '%' => out.push(Tok::Percent),
            '@' => out.push(Tok::Text),
            'E' | 'e' if matches!(chars.get(i + 1), Some('+' | '-')) => {
                out.push(Tok::Exp(chars[i + 1].to_string()));
                i += 2;
                continue;
            }
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => {
                let lower = c.to_ascii_lowercase();
                let run = chars[i..].iter().take_while(|ch| ch.to_ascii_lowercase() == lower).count();
                out.push(Tok::Date(std::iter::repeat_n(lower, run).collect()));
                i += run;
                continue;
            }
            _ => out.push(Tok::Lit(c.to_string())),
        }
        i += 1;
    }
    out
}

/* ========================== DATES ========================================== */

/// Serial day number → date-time. The 1900 system keeps Excel's phantom
/// 1900-02-29 (serial 60).
fn serial_to_datetime(serial: f64, date1904: bool) -> Option<NaiveDateTime> {
    if !(0.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let base = if date1904 {
        NaiveDate::from_ymd_opt(1904, 1, 1)?
    } else if serial < 61.0 {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };
    let whole = serial.floor();
    let millis = ((serial - whole) * 86_400_000.0).round() as i64;
    let midnight = base.checked_add_signed(TimeDelta::days(whole as i64))?.and_hms_opt(0, 0, 0)?;
    midnight.checked_add_signed(TimeDelta::milliseconds(millis))
}

fn round_to_second(dt: NaiveDateTime) -> NaiveDateTime {
    let rounded = dt + TimeDelta::milliseconds(500);
    rounded.with_nanosecond(0).unwrap_or(rounded)
}

/// Indices of `m`/`mm` tokens that mean minutes: right after an hour token
/// or right before a seconds token.
fn minute_positions(tokens: &[Tok]) -> Vec<usize> {
    let dates: Vec<(usize, &str)> = tokens
        .iter()
        .enumerate()
        .filter_map(|(i, t)| match t {
            Tok::Date(d) => Some((i, d.as_str())),
            _ => None,
        })
        .collect();
    let mut out = Vec::new();
    for (k, &(i, d)) in dates.iter().enumerate() {
        if !(d == "m" || d == "mm") {
            continue;
        }
        let after_hour = k > 0 && (dates[k - 1].1.starts_with('h') || dates[k - 1].1.starts_with("[h"));
        let before_second = dates.get(k + 1).is_some_and(|(_, n)| n.starts_with('s'));
        if after_hour || before_second {
            out.push(i);
        }
    }
    out
}

const MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September", "October",
    "November", "December",
];
const WEEKDAYS: [&str; 7] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"];

fn date_part(token: &str, dt: NaiveDateTime, serial: f64, twelve_hour: bool, minutes: bool) -> String {
    let month = MONTHS[dt.month0() as usize];
    let weekday = WEEKDAYS[dt.weekday().num_days_from_monday() as usize];
    let hour12 = match dt.hour() % 12 {
        0 => 12,
        h => h,
    };
    let hour = if twelve_hour { hour12 } else { dt.hour() };
    match token {
        "yy" | "y" => format!("{:02}", dt.year() % 100),
        t if t.starts_with('y') => format!("{:04}", dt.year()),
        "m" if minutes => dt.minute().to_string(),
        "mm" if minutes => format!("{:02}", dt.minute()),
        "m" => dt.month().to_string(),
        "mm" => format!("{:02}", dt.month()),
        "mmm" => month[..3].to_owned(),
        "mmmmm" => month[..1].to_owned(),
        t if t.starts_with('m') => month.to_owned(),
        "d" => dt.day().to_string(),
        "dd" => format!("{:02}", dt.day()),
        "ddd" => weekday[..3].to_owned(),
        t if t.starts_with('d') => weekday.to_owned(),
        "h" => hour.to_string(),
        t if t.starts_with('h') => format!("{hour:02}"),
        "s" => dt.second().to_string(),
        t if t.starts_with('s') => format!("{:02}", dt.second()),
        "am/pm" => if dt.hour() < 12 { "AM" } else { "PM" }.to_owned(),
        "a/p" => if dt.hour() < 12 { "A" } else { "P" }.to_owned(),
        t if t.starts_with("[h") => format!("{:0width$}", (serial * 24.0).floor() as i64, width = t.len() - 2),
        t if t.starts_with("[m") => format!("{:0width$}", (serial * 1440.0).floor() as i64, width = t.len() - 2),
        t if t.starts_with("[s") => format!("{:0width$}", (serial * 86_400.0).round() as i64, width = t.len() - 2),
        other => other.to_owned(),
    }
}

/* ========================== HELPERS ======================================== */

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_owned()
    } else {
        s.to_owned()
    }
}

fn group_thousands(digits: &str, sep: char) -> String {
    let len = digits.chars().count();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(ch);
    }
    out
}
