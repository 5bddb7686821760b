use chrono::{DateTime, Local};

/// A `log_date_format` pattern such as `YYYY-MM-DD HH:mm:ss`, translated to
/// a chrono strftime string at load time.
///
/// Supported tokens: `YYYY YY MM M DD D HH H hh h mm m ss s SSS A ZZ Z`.
/// Any other run of those letters is rejected; every other character is
/// copied through literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
    pattern: String,
    strftime: String,
}

/// Token letters that must form a recognised token
const TOKEN_LETTERS: &str = "YMDHhmsSAZ";

impl DateFormat {
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let mut strftime = String::with_capacity(pattern.len() * 2);
        let chars: Vec<char> = pattern.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let mut run = 1;
            while i + run < chars.len() && chars[i + run] == c {
                run += 1;
            }

            if TOKEN_LETTERS.contains(c) {
                let token: String = std::iter::repeat(c).take(run).collect();
                let translated = match token.as_str() {
                    "YYYY" => "%Y",
                    "YY" => "%y",
                    "MM" => "%m",
                    "M" => "%-m",
                    "DD" => "%d",
                    "D" => "%-d",
                    "HH" => "%H",
                    "H" => "%-H",
                    "hh" => "%I",
                    "h" => "%-I",
                    "mm" => "%M",
                    "m" => "%-M",
                    "ss" => "%S",
                    "s" => "%-S",
                    "SSS" => "%3f",
                    "A" => "%p",
                    "ZZ" => "%z",
                    "Z" => "%:z",
                    _ => return Err(format!("unsupported token '{}' in '{}'", token, pattern)),
                };
                strftime.push_str(translated);
            } else {
                for _ in 0..run {
                    if c == '%' {
                        strftime.push_str("%%");
                    } else {
                        strftime.push(c);
                    }
                }
            }

            i += run;
        }

        Ok(Self {
            pattern: pattern.to_string(),
            strftime,
        })
    }

    /// The pattern as written in the config
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn strftime(&self) -> &str {
        &self.strftime
    }

    pub fn format(&self, timestamp: &DateTime<Local>) -> String {
        timestamp.format(&self.strftime).to_string()
    }

    pub fn now(&self) -> String {
        self.format(&Local::now())
    }
}
