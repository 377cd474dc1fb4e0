pub mod factors;
pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_DEV_USERNAME: &str = "dev-username";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("factorgate")
        .about("MFA factor management")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("FACTORGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "Postgres connection string. Without it every store is kept in memory and a development session is opened at startup.",
                )
                .env("FACTORGATE_DSN"),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL allowed by CORS")
                .env("FACTORGATE_FRONTEND_BASE_URL")
                .default_value("https://factorgate.dev"),
        )
        .arg(
            Arg::new(ARG_DEV_USERNAME)
                .long(ARG_DEV_USERNAME)
                .help("Username of the development session opened in memory mode")
                .env("FACTORGATE_DEV_USERNAME")
                .default_value("dev")
                .conflicts_with(ARG_DSN),
        );

    let command = factors::with_args(command);
    logging::with_args(command)
}
