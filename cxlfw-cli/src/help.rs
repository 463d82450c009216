//! Localized help output for the CLI.
//!
//! clap stays the source of truth for structure; the locale files supply
//! section headings, command descriptions, and argument help.

use clap::{Arg, Command, CommandFactory};
use rust_i18n::t;

use crate::Cli;

/// Supported locales for i18n.
pub(crate) const SUPPORTED_LOCALES: &[&str] = &["en", "zh-CN"];

/// Detect the best matching locale from system settings.
pub(crate) fn detect_locale() -> String {
    let system_locale = sys_locale::get_locale().unwrap_or_else(|| "en".to_string());
    normalize_locale(&system_locale)
}

/// Map a system locale string onto a supported locale.
///
/// - `zh_CN.UTF-8`, `zh-CN` and `zh` become `zh-CN`
/// - `en_US.UTF-8`, `C`, `POSIX` and anything else become `en`
pub(crate) fn normalize_locale(raw: &str) -> String {
    let locale = raw.split('.').next().unwrap_or(raw).replace('_', "-");

    if SUPPORTED_LOCALES.contains(&locale.as_str()) {
        return locale;
    }

    let lang_code = locale.split('-').next().unwrap_or(&locale);
    match lang_code.to_lowercase().as_str() {
        "zh" => "zh-CN".to_string(),
        _ => "en".to_string(),
    }
}

/// Build a clap `Command` with fully localized help output.
pub(crate) fn build_localized_command() -> Command {
    // Headings must be 'static; the CLI builds this command once per run.
    let args_heading: &'static str =
        Box::leak(t!("help.arguments_heading").to_string().into_boxed_str());
    let opts_heading: &'static str =
        Box::leak(t!("help.options_heading").to_string().into_boxed_str());

    let tpl = format!(
        "{{bin}} {{version}}\n\n{{about}}\n\n\
         {usage_h}:\n  {{usage}}\n\n\
         {cmds_h}:\n{{subcommands}}\n\n\
         {opts_h}:\n{{options}}\n\n\
         {{after-help}}\n",
        usage_h = t!("help.usage_heading"),
        cmds_h = t!("help.commands_heading"),
        opts_h = opts_heading,
    );

    let sub_tpl = format!(
        "{{bin}} {{version}}\n\n{{about}}\n\n\
         {usage_h}:\n  {{usage}}\n\n\
         {{all-args}}\n",
        usage_h = t!("help.usage_heading"),
    );

    Cli::command()
        .help_template(&tpl)
        .about(t!("app.about").to_string())
        .after_help(t!("app.after_help").to_string())
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("help")
                .short('h')
                .long("help")
                .help(t!("arg.help_flag.help").to_string())
                .action(clap::ArgAction::Help)
                .global(true),
        )
        .arg(
            Arg::new("version")
                .short('V')
                .long("version")
                .help(t!("arg.version_flag.help").to_string())
                .action(clap::ArgAction::Version)
                .global(true),
        )
        .mut_args(move |arg| with_heading(localize_arg(arg), args_heading, opts_heading))
        .mut_subcommands(move |sub| {
            let key = format!("cmd.{}.about", sub.get_name().replace('-', "_"));
            let localized = t!(&key).to_string();
            let sub = if localized != key {
                sub.about(localized)
            } else {
                sub
            };
            sub.help_template(sub_tpl.clone())
                .mut_args(move |arg| with_heading(localize_arg(arg), args_heading, opts_heading))
        })
        .disable_help_subcommand(true)
        .subcommand(Command::new("help").about(t!("cmd.help.about").to_string()))
}

/// Positionals go under the arguments heading, flags under options.
fn with_heading(arg: Arg, args_heading: &'static str, opts_heading: &'static str) -> Arg {
    if arg.get_short().is_none() && arg.get_long().is_none() {
        arg.help_heading(args_heading)
    } else {
        arg.help_heading(opts_heading)
    }
}

/// Replace an arg's help with `arg.<id>.help` from the locale, if present.
pub(crate) fn localize_arg(arg: Arg) -> Arg {
    let key = format!("arg.{}.help", arg.get_id().as_str());
    let localized = t!(&key).to_string();
    if localized != key {
        arg.help(localized)
    } else {
        arg
    }
}
