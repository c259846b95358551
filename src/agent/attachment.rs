use crate::message::Attachment;
use std::fmt::Write;

pub fn format_for_prompt(attachments: &[Attachment]) -> String {
    if attachments.is_empty() {
        return String::new();
    }

    let mut out = String::from("[Attachments]\n");
    for att in attachments {
        let _ = writeln!(
            out,
            "- {} ({}): {}",
            att.name.as_deref().unwrap_or("unnamed"),
            att.content_type.as_deref().unwrap_or("unknown"),
            att.url,
        );
    }
    out
}
