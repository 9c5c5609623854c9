//! mIRC formatting codes.
//!
//! Message bodies carry inline control bytes:
//!
//! - `\x02` bold (accepted but not rendered, so it carries no state)
//! - `\x1f` underline
//! - `\x03<fg>[,<bg>]` color, one or two decimal digits each
//! - `\x0f` reset everything
//!
//! [`parse`] makes one left-to-right pass, carrying the current style forward
//! and emitting a [`StyledRun`] for every non-empty stretch of text between
//! control sequences. Unknown colors degrade to "no color"; nothing here fails.

use std::fmt;

pub const BOLD: char = '\x02';
pub const COLOR: char = '\x03';
pub const RESET: char = '\x0f';
pub const UNDERLINE: char = '\x1f';

/// The 16 mIRC colors, indexed by color number. See <https://www.mirc.com/colors.html>.
pub const PALETTE: [&str; 16] = [
    "#ffffff", "#000000", "#00007f", "#009300", "#ff0000", "#7f0000", "#9c009c", "#fc7f00",
    "#ffff00", "#00fc00", "#009393", "#00ffff", "#0000fc", "#ff00ff", "#7f7f7f", "#d2d2d2",
];

/// Default text color.
pub const FOREGROUND: &str = PALETTE[0];
/// Default background color.
pub const BACKGROUND: &str = "#242323";

/// Hex color for a palette index, if it is in range.
pub fn palette_color(index: u8) -> Option<&'static str> {
    PALETTE.get(index as usize).copied()
}

/// A style attribute attached to a run of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleTag {
    Foreground(u8),
    Background(u8),
    Underline,
}

impl fmt::Display for StyleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StyleTag::Foreground(n) => write!(f, "foreground-{n}"),
            StyleTag::Background(n) => write!(f, "background-{n}"),
            StyleTag::Underline => f.write_str("underline"),
        }
    }
}

/// Style state in effect for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Style {
    pub foreground: Option<u8>,
    pub background: Option<u8>,
    pub underline: bool,
}

impl Style {
    /// Tags in canonical order: foreground, background, underline.
    pub fn tags(&self) -> Vec<StyleTag> {
        let mut tags = Vec::with_capacity(3);
        if let Some(fg) = self.foreground {
            tags.push(StyleTag::Foreground(fg));
        }
        if let Some(bg) = self.background {
            tags.push(StyleTag::Background(bg));
        }
        if self.underline {
            tags.push(StyleTag::Underline);
        }
        tags
    }

    pub fn is_plain(&self) -> bool {
        *self == Style::default()
    }
}

/// A stretch of visible text and the style it is shown with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledRun {
    pub text: String,
    pub style: Style,
}

impl StyledRun {
    pub fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            style: Style::default(),
        }
    }

    pub fn tags(&self) -> Vec<StyleTag> {
        self.style.tags()
    }

    /// Tag names as a UI toolkit would see them (`foreground-4`, `underline`).
    pub fn tag_names(&self) -> Vec<String> {
        self.tags().iter().map(|t| t.to_string()).collect()
    }
}

/// Split a message body into styled runs.
pub fn parse(text: &str) -> Vec<StyledRun> {
    let mut runs = Vec::new();
    let mut style = Style::default();
    let mut run_start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if !matches!(bytes[i], 0x02 | 0x03 | 0x0f | 0x1f) {
            i += 1;
            continue;
        }

        // Text collected so far keeps the style that was in effect for it.
        if run_start < i {
            runs.push(StyledRun {
                text: text[run_start..i].to_string(),
                style,
            });
        }

        i += match bytes[i] {
            0x1f => {
                style.underline = true;
                1
            }
            0x0f => {
                style = Style::default();
                1
            }
            0x03 => 1 + apply_color(&bytes[i + 1..], &mut style),
            _ => 1,
        };
        run_start = i;
    }

    if run_start < bytes.len() {
        runs.push(StyledRun {
            text: text[run_start..].to_string(),
            style,
        });
    }
    runs
}

/// Apply the digits following a `\x03` to `style`; returns how many bytes
/// after the `\x03` belong to the sequence.
///
/// A bare `\x03` (no digits) clears both colors.
fn apply_color(after: &[u8], style: &mut Style) -> usize {
    let fg_len = digit_run(after);
    if fg_len == 0 {
        style.foreground = None;
        style.background = None;
        return 0;
    }
    style.foreground = color_index(&after[..fg_len]);

    let mut len = fg_len;
    if after.get(len) == Some(&b',') {
        let bg_len = digit_run(&after[len + 1..]);
        if bg_len > 0 {
            style.background = color_index(&after[len + 1..len + 1 + bg_len]);
            len += 1 + bg_len;
        }
    }
    len
}

/// Number of leading ASCII digits, at most two.
fn digit_run(bytes: &[u8]) -> usize {
    bytes.iter().take(2).take_while(|b| b.is_ascii_digit()).count()
}

fn color_index(digits: &[u8]) -> Option<u8> {
    let value = digits.iter().fold(0u8, |acc, d| acc * 10 + (d - b'0'));
    (usize::from(value) < PALETTE.len()).then_some(value)
}

/// Re-encode styled runs as control bytes.
///
/// Colors are always written with two digits so text starting with a digit
/// is never absorbed into the code. When a run drops an attribute that can
/// only be cleared by a reset, a `\x0f` is emitted and the remaining
/// attributes are re-applied.
pub fn serialize(runs: &[StyledRun]) -> String {
    let mut out = String::new();
    let mut current = Style::default();

    for run in runs {
        if run.text.is_empty() {
            continue;
        }
        let target = run.style;
        let needs_reset = (current.underline && !target.underline)
            || (current.foreground.is_some() && target.foreground.is_none())
            || (current.background.is_some() && target.background.is_none());

        if needs_reset {
            out.push(RESET);
            current = Style::default();
        }

        if target.underline && !current.underline {
            out.push(UNDERLINE);
        }

        if target.foreground != current.foreground || target.background != current.background {
            out.push(COLOR);
            // 99 is out of range and so parses back as "no foreground"
            out.push_str(&format!("{:02}", target.foreground.unwrap_or(99)));
            // Text starting with ",<digit>" would otherwise be read as a background.
            if target.background != current.background || run.text.starts_with(',') {
                out.push_str(&format!(",{:02}", target.background.unwrap_or(99)));
            }
        }

        current = target;
        out.push_str(&run.text);
    }
    out
}

/// Body text with every formatting code removed.
pub fn strip(text: &str) -> String {
    parse(text).into_iter().map(|run| run.text).collect()
}
