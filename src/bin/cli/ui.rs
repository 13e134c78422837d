use nu_ansi_term::{Color, Style};
use std::io::IsTerminal;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Theme {
    Auto,
    Plain,
}

pub struct Ui {
    paint: bool,
    heading: Style,
    ok: Style,
    bad: Style,
}

impl Ui {
    pub fn new(theme: Theme) -> Self {
        let paint = theme == Theme::Auto && std::io::stdout().is_terminal();

        #[cfg(windows)]
        if paint {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        Self {
            paint,
            heading: Style::new().bold(),
            ok: Color::Green.normal(),
            bad: Color::Red.bold(),
        }
    }

    pub fn heading(&self, title: &str) {
        if self.paint {
            println!("{}", self.heading.paint(title));
        } else {
            println!("{title}");
        }
    }

    pub fn row(&self, key: &str, value: impl std::fmt::Display) {
        println!("  {key:>14}: {value}");
    }

    pub fn status(&self, ok: bool, message: &str) {
        let style = if ok { self.ok } else { self.bad };
        if self.paint {
            println!("{}", style.paint(message));
        } else {
            println!("{message}");
        }
    }
}
