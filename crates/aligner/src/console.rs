//! Terminal output: the banner, step tables and the final answer.

use std::io::{self, Write as _};

use aligner_core::observer::{Rendering, render_step};
use aligner_core::{StepContext, StepObserver};
use aligner_model::ContentItem;
use owo_colors::{OwoColorize, Style};

const BAR_CHAR: &str = "▎";
const NAME_HEADER: &str = "Name";
const VALUE_HEADER: &str = "Value";

/// Prints every step to stdout as it happens.
#[derive(Clone, Copy, Debug)]
pub struct ConsoleObserver {
    colored: bool,
}

impl ConsoleObserver {
    /// Creates an observer, with ANSI colors if `colored` is set.
    #[inline]
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }
}

impl StepObserver for ConsoleObserver {
    fn on_step(&self, item: &ContentItem, context: &StepContext) {
        let text = format_rendering(&render_step(item, context), self.colored);
        // A broken stdout must not stop the agent.
        let mut stdout = io::stdout().lock();
        stdout.write_all(text.as_bytes()).ok();
        stdout.flush().ok();
    }
}

/// Formats a rendering as terminal text, ending with a newline.
///
/// Tables have a name column as wide as its longest entry. Multi-line values
/// continue on the following lines with the name column left blank.
pub fn format_rendering(rendering: &Rendering, colored: bool) -> String {
    let bar = paint(BAR_CHAR, Style::new().bright_cyan(), colored);
    match rendering {
        Rendering::Notice(text) => {
            format!("{bar}{}\n", paint(text, Style::new().dimmed(), colored))
        }
        Rendering::Table { title, rows } => {
            let width = rows
                .iter()
                .map(|(name, _)| name.chars().count())
                .chain([NAME_HEADER.len()])
                .max()
                .unwrap_or_default();

            let mut out = format!(
                "{bar}{}\n",
                paint(title, Style::new().bright_white().bold(), colored)
            );
            out.push_str(&format!(
                "{bar} {} │ {}\n",
                paint(
                    &format!("{NAME_HEADER:<width$}"),
                    Style::new().yellow(),
                    colored
                ),
                paint(VALUE_HEADER, Style::new().green(), colored),
            ));
            out.push_str(&format!(
                "{bar}{}┼{}\n",
                "─".repeat(width + 2),
                "─".repeat(VALUE_HEADER.len() + 2)
            ));
            for (name, value) in rows {
                let mut lines = value.lines();
                let first = lines.next().unwrap_or_default();
                out.push_str(&format!("{bar} {name:<width$} │ {first}\n"));
                for line in lines {
                    out.push_str(&format!("{bar} {:<width$} │ {line}\n", ""));
                }
            }
            out
        }
    }
}

/// Formats the startup banner.
pub fn format_banner(title: &str, colored: bool) -> String {
    let bar = paint(BAR_CHAR, Style::new().bright_yellow(), colored);
    format!(
        "{bar}{}\n",
        paint(title, Style::new().bright_white().bold(), colored)
    )
}

/// Formats the final answer.
pub fn format_answer(answer: &str, colored: bool) -> String {
    let bar = paint(BAR_CHAR, Style::new().bright_cyan(), colored);
    format!(
        "{bar}🤖 {}\n",
        paint(answer, Style::new().bright_white(), colored)
    )
}

#[inline]
fn paint(text: &str, style: Style, colored: bool) -> String {
    if colored {
        text.style(style).to_string()
    } else {
        text.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table() {
        let rendering = Rendering::Table {
            title: "WikidataMCP.query_capital".to_owned(),
            rows: vec![
                ("capital".to_owned(), "Budapest".to_owned()),
                ("labels".to_owned(), "[\n  \"hu\",\n  \"en\"\n]".to_owned()),
            ],
        };
        assert_eq!(
            format_rendering(&rendering, false),
            "▎WikidataMCP.query_capital\n\
             ▎ Name    │ Value\n\
             ▎─────────┼───────\n\
             ▎ capital │ Budapest\n\
             ▎ labels  │ [\n\
             ▎         │   \"hu\",\n\
             ▎         │   \"en\"\n\
             ▎         │ ]\n"
        );
    }

    #[test]
    fn test_empty_value_and_short_names() {
        let rendering = Rendering::Table {
            title: "t".to_owned(),
            rows: vec![("a".to_owned(), String::new())],
        };
        assert_eq!(
            format_rendering(&rendering, false),
            "▎t\n▎ Name │ Value\n▎──────┼───────\n▎ a    │ \n"
        );
    }

    #[test]
    fn test_notice_and_answer() {
        let rendering =
            Rendering::Notice("WikidataMCP.forget : no result!".to_owned());
        assert_eq!(
            format_rendering(&rendering, false),
            "▎WikidataMCP.forget : no result!\n"
        );
        assert_eq!(format_answer("Budapest", false), "▎🤖 Budapest\n");
        assert_eq!(
            format_banner("Wikidata Aligner v0.1", false),
            "▎Wikidata Aligner v0.1\n"
        );

        let colored = format_answer("Budapest", true);
        assert!(colored.contains("Budapest"));
        assert!(colored.contains('\u{1b}'));
    }
}
