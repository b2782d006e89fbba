use chrono::{Local, NaiveDate};
use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system.md");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

#[derive(Serialize)]
struct SystemPromptContext {
    os: String,
    date: String,
    is_mac: bool,
}

/// Human name for an OS as reported by `std::env::consts::OS`
fn os_display_name(os: &str) -> String {
    match os {
        "macos" => "Mac OS".to_string(),
        "linux" => "Linux".to_string(),
        "windows" => "Windows".to_string(),
        "freebsd" => "FreeBSD".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

/// Render the system prompt for a given OS and date, appending `suffix` after a space
pub fn render_system_prompt(
    os: &str,
    date: NaiveDate,
    suffix: Option<&str>,
) -> Result<String, TeraError> {
    let context = SystemPromptContext {
        os: os_display_name(os),
        date: date.format("%A, %B %d, %Y").to_string(),
        is_mac: os == "macos",
    };
    let mut prompt = load_prompt(SYSTEM_PROMPT_TEMPLATE, &context)?
        .trim_end()
        .to_string();
    if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
        prompt.push(' ');
        prompt.push_str(suffix);
    }
    Ok(prompt)
}

/// The system prompt for this machine, today
pub fn system_prompt(suffix: Option<&str>) -> Result<String, TeraError> {
    render_system_prompt(std::env::consts::OS, Local::now().date_naive(), suffix)
}
