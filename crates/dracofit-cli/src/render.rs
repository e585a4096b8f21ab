use std::io::{self, Write};

use dracofit_chat::{ChatMessage, Interaction, ModelStatus};

/// Writes a streaming bot message incrementally, printing only the text
/// that was appended since the last update.
pub struct StreamPrinter<W: Write> {
    out: W,
    printed: String,
}

impl<W: Write> StreamPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: String::new(),
        }
    }

    pub fn show(&mut self, message: &ChatMessage) -> io::Result<()> {
        match message.text.strip_prefix(self.printed.as_str()) {
            Some(rest) => self.out.write_all(rest.as_bytes())?,
            None => {
                // The final text replaced what was streamed (full_response or
                // an error annotation); print it whole on its own line.
                if !self.printed.is_empty() {
                    writeln!(self.out)?;
                }
                self.out.write_all(message.text.as_bytes())?;
            }
        }
        self.printed.clone_from(&message.text);
        if !message.is_loading {
            if message.is_error {
                write!(self.out, "  (!)")?;
            }
            writeln!(self.out)?;
            self.printed.clear();
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn status_line(status: &ModelStatus) -> String {
    let mut line = format!("DracoBot [{}]", status.badge());
    if let Some(error) = status.error.as_deref() {
        line.push_str(": ");
        line.push_str(error);
    }
    line
}

pub fn history_lines(history: &[Interaction]) -> Vec<String> {
    history
        .iter()
        .flat_map(|interaction| {
            let when = interaction
                .timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            [
                format!("[{when}] you: {}", interaction.question),
                format!("[{when}] bot: {}", interaction.answer),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dracofit_chat::Sender;

    fn bot(text: &str, is_loading: bool, is_error: bool) -> ChatMessage {
        ChatMessage {
            id: "bot-1".into(),
            text: text.into(),
            sender: Sender::Bot,
            timestamp: chrono::Utc::now(),
            is_loading,
            is_error,
        }
    }

    fn render(updates: &[ChatMessage]) -> String {
        let mut printer = StreamPrinter::new(Vec::new());
        for update in updates {
            printer.show(update).expect("write");
        }
        String::from_utf8(printer.into_inner()).expect("utf8")
    }

    #[test]
    fn prints_only_appended_text() {
        let out = render(&[
            bot("Hel", true, false),
            bot("Hello", true, false),
            bot("Hello", false, false),
        ]);
        assert_eq!(out, "Hello\n");
    }

    #[test]
    fn replaced_final_text_is_printed_on_new_line() {
        let out = render(&[
            bot("Hi", true, false),
            bot("Hi [Error: model unavailable]", false, true),
        ]);
        assert_eq!(out, "Hi [Error: model unavailable]  (!)\n");

        let out = render(&[bot("draft", true, false), bot("Final.", false, false)]);
        assert_eq!(out, "draft\nFinal.\n");
    }

    #[test]
    fn status_line_includes_error() {
        let status = ModelStatus {
            error: Some("model not loaded".into()),
            ..ModelStatus::default()
        };
        assert_eq!(status_line(&status), "DracoBot [CHECKING...]: model not loaded");
    }
}
