use anyhow::Result;
use std::fs::{self, File};
use std::io::{self, BufRead, Write};
use std::path::Path;

use wayfarer::models::message::Message;

/// Write the conversation as JSON lines, one message per line, replacing the file
pub fn persist_messages(transcript_file: &Path, messages: &[Message]) -> Result<()> {
    if let Some(parent) = transcript_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(transcript_file)?;
    let mut writer = io::BufWriter::new(file);

    for message in messages {
        serde_json::to_writer(&mut writer, &message)?;
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}

/// Read back a transcript written by [`persist_messages`]
pub fn deserialize_messages(file: File) -> Result<Vec<Message>> {
    let reader = io::BufReader::new(file);
    let mut messages = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        messages.push(serde_json::from_str::<Message>(&line)?);
    }

    Ok(messages)
}
