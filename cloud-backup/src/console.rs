//! Interactive restore surface: backup table and selection prompt.

use crate::transfer::BackupObjectDescriptor;
use std::io::{self, BufRead, Write};

const NAME_WIDTH: usize = 50;

/// What the operator picked at the restore prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Zero-based index into the listed backups
    One(usize),
    All,
    Quit,
}

/// Parse a prompt answer: a 1-based number, `all`, or `q`. `None` means invalid.
pub fn parse_selection(input: &str, count: usize) -> Option<Selection> {
    let choice = input.trim().to_lowercase();
    match choice.as_str() {
        "q" | "quit" => Some(Selection::Quit),
        "all" => Some(Selection::All),
        other => match other.parse::<usize>() {
            Ok(n) if (1..=count).contains(&n) => Some(Selection::One(n - 1)),
            _ => None,
        },
    }
}

/// Ask until the answer is valid. End of input counts as quit.
pub fn prompt_selection<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    count: usize,
) -> io::Result<Selection> {
    writeln!(output, "\nRestore options:")?;
    writeln!(output, "  - Enter a number to restore that backup")?;
    writeln!(output, "  - Enter 'all' to restore all backups")?;
    writeln!(output, "  - Enter 'q' to quit")?;

    loop {
        write!(output, "\nYour choice: ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(Selection::Quit);
        }

        match parse_selection(&line, count) {
            Some(selection) => return Ok(selection),
            None => writeln!(
                output,
                "Invalid input! Enter a number between 1 and {count}, 'all' or 'q'."
            )?,
        }
    }
}

/// Render the backup table shown before the prompt.
pub fn render_backups(backups: &[BackupObjectDescriptor]) -> String {
    if backups.is_empty() {
        return "\nNo backups found.\n".to_string();
    }

    let mut out = format!("\nFound {} backup(s):\n\n", backups.len());
    out.push_str(&format!(
        "{:<4} {:<50} {:<12} {:<20} {:<10}\n",
        "#", "Filename", "Size", "Date", "Encrypted"
    ));
    out.push_str(&"-".repeat(100));
    out.push('\n');

    for (idx, backup) in backups.iter().enumerate() {
        out.push_str(&format!(
            "{:<4} {:<50} {:<12} {:<20} {:<10}\n",
            idx + 1,
            truncate_name(&backup.key),
            format_size(backup.size),
            backup.last_modified.format("%Y-%m-%d %H:%M:%S"),
            if backup.is_encrypted { "Yes" } else { "No" }
        ));
    }
    out
}

/// Sizes above 1 MB in MB, everything else in KB.
pub fn format_size(bytes: u64) -> String {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    if mb > 1.0 {
        format!("{:.2} MB", mb)
    } else {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    }
}

fn truncate_name(key: &str) -> String {
    if key.chars().count() > NAME_WIDTH {
        let head: String = key.chars().take(NAME_WIDTH - 3).collect();
        format!("{head}...")
    } else {
        key.to_string()
    }
}
