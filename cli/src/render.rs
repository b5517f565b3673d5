use owo_colors::OwoColorize;
use owo_colors::Style;
use rtsandbox_core::ConsoleLine;
use rtsandbox_core::LineTag;
use supports_color::Stream;

/// Turns console lines into terminal text, colouring the tag label when the
/// output stream supports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn detect() -> Self {
        Self {
            color: supports_color::on(Stream::Stdout).is_some(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn render(self, line: &ConsoleLine) -> String {
        let label = line.tag().label();
        let body = line.body();
        if self.color {
            format!("{} {body}", label.style(tag_style(line.tag())))
        } else {
            format!("{label} {body}")
        }
    }

    /// Supervisor notices such as `[*] Target started.` or `[!] ...`.
    pub fn notice(self, text: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        if let Some(rest) = text.strip_prefix("[!]") {
            format!("{}{rest}", "[!]".red().bold())
        } else if let Some(rest) = text.strip_prefix("[*]") {
            format!("{}{rest}", "[*]".bold())
        } else {
            text.to_string()
        }
    }
}

fn tag_style(tag: LineTag) -> Style {
    match tag {
        LineTag::Out => Style::new().dimmed(),
        LineTag::Http => Style::new().green().bold(),
        LineTag::Dns => Style::new().cyan().bold(),
        LineTag::Socket => Style::new().blue().bold(),
        LineTag::Process => Style::new().magenta().bold(),
        LineTag::Event => Style::new().yellow(),
        LineTag::Warn => Style::new().red().bold(),
        LineTag::Info => Style::new().bold(),
    }
}
