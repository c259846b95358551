use crate::models::ChatModel;
use crate::store::DocumentKind;
use once_cell::sync::Lazy;
use std::fmt::Write;

const PREAMBLE_BEHAVIOR: &str = "You are a friendly assistant! Keep your responses concise and helpful.\n\
                                 Format answers with Markdown: headings, lists, **bold**, `code` and fenced code blocks.\n\
                                 Match the user's language.\n\n";

const PREAMBLE_ARTIFACTS: &str = "# Documents\n\
                                  Documents are a side panel next to the conversation for writing, editing and content creation.\n\
                                  - **createDocument**: use for substantial content (>10 lines), code, or content the user is likely to save or reuse. \
                                    Do not use it for short conversational answers or when asked to keep the answer in chat.\n\
                                  - **updateDocument**: rewrite an existing document following the user's instructions. \
                                    Do not update a document right after creating it; wait for feedback first.\n\
                                  - **requestSuggestions**: propose edits for an existing document.\n\
                                  When writing code, use a code document and specify the language in the backticks.\n\n";

const PREAMBLE_WEATHER: &str = "- **getWeather**: current temperature, hourly forecast and sunrise/sunset for a place or coordinates.\n\n";

pub const TITLE_PREAMBLE: &str = "You will generate a short title based on the first message a user begins a conversation with.\n\
                                  - Ensure it is not more than 80 characters long.\n\
                                  - The title should be a summary of the user's message.\n\
                                  - Do not use quotes or colons.\n\
                                  Reply with the title only.";

pub const SUGGESTIONS_PREAMBLE: &str = "You are a helpful writing assistant. Given a piece of writing, offer suggestions to improve it \
                                        and describe each change. Edits must contain full sentences instead of single words. \
                                        Give at most 5 suggestions.\n\
                                        Reply with a JSON array only, each element shaped as \
                                        {\"originalSentence\": string, \"suggestedSentence\": string, \"description\": string}.";

static TIMEZONE: Lazy<String> =
    Lazy::new(|| iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string()));

/// System prompt for a chat turn. Tool guidance is only included when tools are active.
pub fn build_system_prompt(model: &ChatModel, tools_active: bool) -> String {
    let now = chrono::Local::now();
    let mut preamble = String::with_capacity(2048);
    let _ = write!(
        preamble,
        "You are answering as {}.\n\
         Current time: {} ({})\n\n",
        model.name,
        now.format("%Y-%m-%d %H:%M:%S"),
        *TIMEZONE
    );

    preamble.push_str(PREAMBLE_BEHAVIOR);

    if tools_active {
        preamble.push_str("# Tools\n");
        preamble.push_str(PREAMBLE_WEATHER);
        preamble.push_str(PREAMBLE_ARTIFACTS);
    }

    preamble
}

pub fn document_preamble(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Text => {
            "Write about the given topic. Markdown is supported. Use headings wherever appropriate. \
             Reply with the document body only."
        }
        DocumentKind::Code => {
            "You are a code generator that creates self-contained, executable code snippets. \
             Each snippet should be complete and runnable on its own, include helpful comments, \
             stay concise, and avoid external dependencies or network access. \
             Reply with the code only, without fences."
        }
        DocumentKind::Sheet => {
            "You are a spreadsheet creation assistant. Create a spreadsheet in CSV format based on the \
             given prompt. The data should contain meaningful column headers and values. \
             Reply with the CSV only."
        }
    }
}

pub fn update_document_preamble(kind: DocumentKind, current: &str) -> String {
    let what = match kind {
        DocumentKind::Text => "Improve the following contents of the document based on the given prompt.",
        DocumentKind::Code => "Improve the following code snippet based on the given prompt.",
        DocumentKind::Sheet => "Improve the following spreadsheet based on the given prompt.",
    };
    format!("{}\nReply with the full updated document only.\n\n{}", what, current)
}
