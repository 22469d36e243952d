use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use inquire::ui::{Color, RenderConfig, StyleSheet, Styled};
use std::sync::atomic::{AtomicBool, Ordering};
use supports_color::Stream;

use crate::{
    CANCELLED_MESSAGE, Profile, TestResult, UI_ACTIVE_MARK, UI_DETAIL_API_KEY, UI_DETAIL_BASE_URL,
    UI_DETAIL_ID, UI_DETAIL_MODELS, UI_DETAIL_UPDATED, UI_ERROR_PREFIX, UI_HINT_ADD_PROFILE,
    UI_HINT_LIST_PROFILES, UI_INFO_PREFIX, UI_NO_PROFILES, UI_WARNING_PREFIX, command_name,
};

static PLAIN: AtomicBool = AtomicBool::new(false);

pub fn set_plain(value: bool) {
    PLAIN.store(value, Ordering::Relaxed);
}

pub fn is_plain() -> bool {
    PLAIN.load(Ordering::Relaxed)
}

pub fn use_color_stdout() -> bool {
    supports_color(Stream::Stdout)
}

pub fn use_color_stderr() -> bool {
    supports_color(Stream::Stderr)
}

fn supports_color(stream: Stream) -> bool {
    if is_plain() {
        return false;
    }
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    supports_color::on(stream).is_some()
}

pub fn style_text<F>(text: &str, use_color: bool, style: F) -> String
where
    F: FnOnce(colored::ColoredString) -> colored::ColoredString,
{
    if use_color && !is_plain() {
        style(text.normal()).to_string()
    } else {
        text.to_string()
    }
}

pub fn format_cmd(command: &str, use_color: bool) -> String {
    let text = format!("`{command}`");
    style_text(&text, use_color, |text| text.yellow().bold())
}

pub fn format_action(message: &str, use_color: bool) -> String {
    let text = if is_plain() {
        message.to_string()
    } else {
        format!("✅ {message}")
    };
    style_text(&text, use_color, |text| text.green().bold())
}

pub fn format_warning(message: &str, use_color: bool) -> String {
    let prefix = UI_WARNING_PREFIX;
    let mut lines = message.lines();
    let first = lines.next().unwrap_or_default();
    let mut text = format!("{prefix}{first}");
    let indent = " ".repeat(prefix.len());
    for line in lines {
        text.push('\n');
        text.push_str(&indent);
        text.push_str(line);
    }
    style_text(&text, use_color, |text| text.yellow().dimmed().italic())
}

pub fn format_cancel(use_color: bool) -> String {
    style_text(CANCELLED_MESSAGE, use_color, |text| text.dimmed().italic())
}

pub fn format_hint(message: &str, use_color: bool) -> String {
    if is_plain() {
        crate::msg1(UI_INFO_PREFIX, message)
    } else {
        let message = format!("\n\n{message}");
        style_text(&message, use_color, |text| text.italic())
    }
}

pub fn format_no_profiles(use_color: bool) -> String {
    let add = format_command("add --name <name> --base-url <url> --api-key <key>", use_color);
    let hint = format_hint(&UI_HINT_ADD_PROFILE.replace("{add}", &add), use_color);
    let hint = if is_plain() { format!(" {hint}") } else { hint };
    crate::msg1(UI_NO_PROFILES, hint)
}

pub fn format_list_hint(use_color: bool) -> String {
    let list = format_command("list", use_color);
    format_hint(&UI_HINT_LIST_PROFILES.replace("{list}", &list), use_color)
}

pub fn format_error(message: &str) -> String {
    let message = message
        .strip_prefix(&format!("{UI_ERROR_PREFIX} "))
        .unwrap_or(message);
    let use_color = use_color_stderr();
    let prefix = if use_color {
        UI_ERROR_PREFIX.red().bold().to_string()
    } else {
        UI_ERROR_PREFIX.to_string()
    };
    let mut lines = message.lines();
    let first = lines.next().unwrap_or_default();
    let mut text = format!("{prefix} {first}");
    for line in lines {
        text.push('\n');
        text.push_str(&style_text(line, use_color, |text| text.dimmed().italic()));
    }
    text
}

/// Shows enough of a key to tell keys apart without revealing it.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.trim().chars().collect();
    if chars.len() <= 12 {
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        return format!("…{tail}");
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

pub fn format_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| ms.to_string())
}

pub fn format_entry_header(profile: &Profile, is_active: bool, use_color: bool) -> String {
    let name = if use_color {
        profile.name.bold().to_string()
    } else {
        profile.name.clone()
    };
    if !is_active {
        return name;
    }
    let badge = if use_color {
        format!(" {UI_ACTIVE_MARK} ").white().on_green().to_string()
    } else {
        format!("[{}]", UI_ACTIVE_MARK.to_uppercase())
    };
    format!("{name} {badge}")
}

pub fn profile_detail_lines(profile: &Profile, use_color: bool) -> Vec<String> {
    let mut lines = vec![
        crate::msg1(UI_DETAIL_BASE_URL, &profile.base_url),
        crate::msg1(UI_DETAIL_API_KEY, mask_api_key(&profile.api_key)),
    ];
    if let Some(models) = profile.models.as_ref().filter(|models| !models.is_empty()) {
        let listed = models
            .iter()
            .map(|(slot, model)| format!("{slot}={model}"))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(crate::msg1(UI_DETAIL_MODELS, listed));
    }
    lines.push(crate::msg1(
        UI_DETAIL_UPDATED,
        format_timestamp(profile.updated_at),
    ));
    lines.push(crate::msg1(UI_DETAIL_ID, &profile.id));
    lines
        .into_iter()
        .map(|line| style_text(&line, use_color, |text| text.dimmed()))
        .collect()
}

pub fn format_test_result(label: &str, result: &TestResult, use_color: bool) -> String {
    let text = format!("{label}: {}", result.message());
    if result.is_success() {
        style_text(&text, use_color, |text| text.green())
    } else {
        style_text(&text, use_color, |text| text.red())
    }
}

pub fn inquire_select_render_config() -> RenderConfig<'static> {
    let mut config = if use_color_stderr() {
        let mut config = RenderConfig::default_colored();
        config.help_message = StyleSheet::new().with_fg(Color::DarkGrey);
        config
    } else {
        RenderConfig::empty()
    };
    config.prompt_prefix = Styled::new("");
    config.answered_prompt_prefix = Styled::new("");
    config
}

pub fn is_inquire_cancel(err: &inquire::error::InquireError) -> bool {
    matches!(
        err,
        inquire::error::InquireError::OperationCanceled
            | inquire::error::InquireError::OperationInterrupted
    )
}

const OUTPUT_INDENT: &str = " ";

pub fn print_output_block(message: &str) {
    let message = if is_plain() {
        message.to_string()
    } else {
        indent_output(message)
    };
    println!("\n{message}\n");
}

fn indent_output(message: &str) -> String {
    message
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{OUTPUT_INDENT}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_command(cmd: &str, use_color: bool) -> String {
    let name = command_name();
    let full = if cmd.is_empty() {
        name.to_string()
    } else {
        format!("{name} {cmd}")
    };
    format_cmd(&full, use_color)
}
