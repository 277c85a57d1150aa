use color_eyre::{eyre::eyre, Result};
use memoir_core::{
    password::{Charset, Password},
    Filter, NewRecord, Record,
};

use crate::{cli::Command, storage::StoreSettings};

/// Execute a store subcommand inside one store session.
pub fn handle(cmd: Command, settings: &StoreSettings) -> Result<()> {
    match cmd {
        Command::Add {
            domain,
            username,
            password,
            generate,
            secure,
            comment,
        } => {
            let password = match (password, generate) {
                (Some(password), _) => Password::from(password),
                (None, Some(length)) => Password::generate(length, charset(secure))?,
                (None, None) => return Err(eyre!("either --password or --generate is required")),
            };
            let mut record = NewRecord::new(domain, username, password.as_str());
            record.comment = comment;
            let id = settings.with_store(|store| Ok(store.put(record)?))?;
            println!("Added account {id}");
            if generate.is_some() {
                println!("Password: {password}");
            }
        }
        Command::List {
            domain,
            username,
            json,
        } => {
            let filter = Filter {
                domain,
                username,
                ..Filter::default()
            };
            let records: Vec<Record> =
                settings.with_store(|store| Ok(store.get(&filter)?.cloned().collect()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No accounts yet. Add one with `memoir add`.");
            } else {
                for record in &records {
                    println!("{}", format_record(record));
                }
            }
        }
        Command::Remove { id } => {
            settings.with_store(|store| Ok(store.delete(id)?))?;
            println!("Removed account {id}");
        }
        other => return Err(eyre!("not a store command: {other:?}")),
    }
    Ok(())
}

pub fn charset(secure: bool) -> Charset {
    if secure {
        Charset::Secure
    } else {
        Charset::Alphanumeric
    }
}

fn format_record(record: &Record) -> String {
    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{:>4}  {}  {}  {}",
        record.id,
        field(&record.domain),
        field(&record.username),
        field(&record.password)
    );
    if let Some(comment) = &record.comment {
        line.push_str(&format!("  # {comment}"));
    }
    line
}
