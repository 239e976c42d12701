// Text rendering for `/gdrive` replies.
//
// Everything here is pure string building so it can be unit tested without
// a Discord connection. Commands pass in an `index` closure that returns the
// optional index-site link for a name.

use crate::core::drive::formatting::human_bytes;
use crate::core::drive::{
    folder_link, BatchReport, DriveError, FolderOutcome, ItemOutcome, LookupResults,
    RemoteObjectRef, ReplicationSummary, TransferSummary,
};

/// Discord's per-message character limit.
pub const MESSAGE_LIMIT: usize = 2000;

/// Listings longer than this go out as a file attachment.
pub const ATTACHMENT_THRESHOLD: usize = 4096;

pub fn format_batch(report: &BatchReport, index: &dyn Fn(&str, bool) -> Option<String>) -> String {
    if report.items.is_empty() {
        return "`[ENTRY - ERROR]`\n\n`Status` : **BAD** - nothing to do.".to_string();
    }

    let mut reply = String::new();
    for item in &report.items {
        match &item.outcome {
            ItemOutcome::Completed(summary) => reply.push_str(&format_summary(summary, index)),
            ItemOutcome::Failed(reason) => reply.push_str(&format!(
                "`[ENTRY - ERROR]`\n\n`Entry  :` `{}`\n`Status :` **BAD**\n`Reason :` `{}`\n",
                item.locator, reason
            )),
            ItemOutcome::Cancelled => reply.push_str(&format!(
                "`[ENTRY - CANCELLED]`\n\n`Entry  :` `{}`\n`Status :` **OK** - received signal cancelled.\n",
                item.locator
            )),
        }
        reply.push('\n');
    }

    if report.items.len() > 1 {
        reply.push_str(&format!(
            "`Done   :` {} ok, {} failed{}",
            report.successes(),
            report.failures(),
            if report.was_cancelled() { ", rest cancelled" } else { "" }
        ));
    }
    reply.trim_end().to_string()
}

fn format_summary(summary: &TransferSummary, index: &dyn Fn(&str, bool) -> Option<String>) -> String {
    match summary {
        TransferSummary::Uploaded(outcome) => {
            let name = &outcome.object.name;
            let mut text = format!(
                "`[FILE - UPLOAD]`\n\n`Name   :` `{}`\n`Size   :` `{}`\n`Link   :` [{}]({})\n`Status :` **OK**\n",
                name,
                human_bytes(outcome.bytes_transferred),
                name,
                outcome.link
            );
            push_index(&mut text, index(name, false));
            text
        }
        TransferSummary::UploadedFolder {
            name,
            link,
            summary,
            size_bytes,
        } => {
            let mut text = format!(
                "`[FOLDER - UPLOAD]`\n\n`Name   :` `{}`\n`Size   :` `{}`\n`Link   :` [{}]({})\n",
                name,
                human_bytes(*size_bytes),
                name,
                link
            );
            text.push_str(&format_replication(summary));
            push_index(&mut text, index(name, true));
            text
        }
        TransferSummary::Downloaded(outcome) => format!(
            "`[FILE - DOWNLOAD]`\n\n`Name   :` `{}`\n`Size   :` `{}`\n`Path   :` `{}`\n`Status :` **OK** - Successfully downloaded.\n",
            outcome.name,
            human_bytes(outcome.bytes_transferred),
            outcome.path.display()
        ),
        TransferSummary::Copied { object, size_bytes } => {
            let tag = if object.is_container {
                "[FOLDER - COPY]"
            } else {
                "[FILE - COPY]"
            };
            let mut text = format!(
                "`{}`\n\n`Name   :` `{}`\n`Size   :` `{}`\n`Link   :` [{}]({})\n`Status :` **OK**\n",
                tag,
                object.name,
                human_bytes(*size_bytes),
                object.name,
                object.share_link()
            );
            push_index(&mut text, index(&object.name, object.is_container));
            text
        }
    }
}

fn format_replication(summary: &ReplicationSummary) -> String {
    if summary.failures.is_empty() {
        return format!("`Files  :` `{}`\n`Status :` **OK**\n", summary.files);
    }

    let mut text = format!(
        "`Files  :` `{}`, `{}` failed\n`Status :` **PARTIAL**\n",
        summary.files,
        summary.failures.len()
    );
    for failure in &summary.failures {
        text.push_str(&format!("  - `{}`: {}\n", failure.item, failure.reason));
    }
    text
}

fn push_index(text: &mut String, link: Option<String>) {
    if let Some(link) = link {
        text.push_str(&format!("👥 [Index URL]({})\n", link));
    }
}

pub fn format_listing(
    items: &[RemoteObjectRef],
    index: &dyn Fn(&str, bool) -> Option<String>,
) -> String {
    if items.is_empty() {
        return "`[GDRIVE - LIST]`\n\n`Status` : **BAD** - no result".to_string();
    }

    let mut text = format!("`[GDRIVE - LIST]`\n\n`Result :` {} item(s)\n\n", items.len());
    for item in items {
        let icon = if item.is_container { "📁" } else { "📄" };
        let size = item
            .size_bytes
            .map(|s| format!(" ({})", human_bytes(s)))
            .unwrap_or_default();
        text.push_str(&format!("{} [{}]({}){}", icon, item.name, item.share_link(), size));
        if let Some(link) = index(&item.name, item.is_container) {
            text.push_str(&format!(" | [Index]({})", link));
        }
        text.push('\n');
    }
    text
}

pub fn format_folders(outcomes: &[FolderOutcome]) -> String {
    let mut text = String::new();
    for outcome in outcomes {
        let (tag, folder) = match outcome {
            FolderOutcome::Created(folder) => ("[FOLDER - CREATE]", folder),
            FolderOutcome::Existing(folder) => ("[FOLDER - EXIST]", folder),
        };
        text.push_str(&format!(
            "`{}`\n\n`Name :` `{}`\n`ID   :` `{}`\n`Link :` [{}]({})\n\n",
            tag,
            folder.name,
            folder.id,
            folder.name,
            folder_link(&folder.id)
        ));
    }
    text.trim_end().to_string()
}

pub fn format_removed(results: &LookupResults) -> String {
    let mut text = String::new();
    for (target, result) in results {
        match result {
            Ok(object) => {
                let tag = if object.is_container {
                    "[FOLDER - DELETE]"
                } else {
                    "[FILE - DELETE]"
                };
                text.push_str(&format!("`{}`\n\n`{}`\n`Status` : **OK**\n\n", tag, object.name));
            }
            Err(e) => text.push_str(&format_lookup_error(target, e)),
        }
    }
    text.trim_end().to_string()
}

pub fn format_inspected(results: &LookupResults) -> String {
    let mut text = String::new();
    for (target, result) in results {
        match result {
            Ok(object) => text.push_str(&format_object(object, None)),
            Err(e) => text.push_str(&format_lookup_error(target, e)),
        }
        text.push('\n');
    }
    text.trim_end().to_string()
}

/// Metadata card for one object; `size` overrides the reported size.
pub fn format_object(object: &RemoteObjectRef, size: Option<u64>) -> String {
    let tag = if object.is_container {
        "[FOLDER - EXIST]"
    } else {
        "[FILE - EXIST]"
    };
    let mut text = format!(
        "`{}`\n\n`Name  :` `{}`\n`ID    :` `{}`\n",
        tag, object.name, object.id
    );
    if let Some(bytes) = size.or(object.size_bytes) {
        text.push_str(&format!("`Size  :` `{}`\n", human_bytes(bytes)));
    }
    text.push_str(&format!("`Link  :` [{}]({})\n", object.name, object.share_link()));
    if let Some(description) = object.description.as_deref().filter(|d| !d.is_empty()) {
        text.push_str(&format!("`About :`\n{}\n", description));
    }
    text
}

fn format_lookup_error(target: &str, error: &DriveError) -> String {
    format!(
        "`[FILE/FOLDER - ERROR]`\n\n`Entry  :` `{}`\n`Status :` **BAD**\n`Reason :` `{}`\n\n",
        target, error
    )
}

pub fn format_error(tag: &str, error: &DriveError) -> String {
    if error.is_cancelled() {
        return format!("`[{} - CANCELLED]`\n\n`Status` : **OK** - received signal cancelled.", tag);
    }
    format!("`[{} - ERROR]`\n\n`Status` : **BAD**\n`Reason` : `{}`", tag, error)
}

/// Split `text` into messages of at most `limit` characters, breaking on
/// newlines where possible.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            // A single overlong line gets hard-wrapped.
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
