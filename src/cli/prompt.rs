use std::io::IsTerminal;

use dialoguer::{theme::ColorfulTheme, Select};
use guard_domain::{Decision, DuplicateInfo};

use super::CliError;

/// Asks the user how to handle a detected duplicate.
pub fn ask_decision(info: &DuplicateInfo) -> Result<Decision, CliError> {
    if !std::io::stdin().is_terminal() {
        return Err(CliError::Input(
            "duplicates found; pass --decision continue|cancel".into(),
        ));
    }
    let prompt = format!(
        "{} existing booking(s) match this invoice. What should happen?",
        info.duplicate_count
    );
    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&["Continue: book it anyway", "Cancel: discard the upload"])
        .default(1)
        .interact()
        .map_err(|err| CliError::Input(format!("prompt failed: {err}")))?;
    Ok(if choice == 0 {
        Decision::Continue
    } else {
        Decision::Cancel
    })
}
