use chrono::Local;
use colored::*;
use env_logger::fmt::Formatter;
use log::{Level, Record};
use std::io::Write;

pub fn init_logger(log_level: &str) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level));
    builder.format(format_log);

    // Filter out logs from actix_server and actix_web
    builder.filter(Some("actix_server"), log::LevelFilter::Warn);
    builder.filter(Some("actix_web"), log::LevelFilter::Warn);
    builder.filter(Some("reqwest"), log::LevelFilter::Warn);

    builder.init();
}

fn level_tag(level: Level) -> ColoredString {
    match level {
        Level::Error => "ERROR".truecolor(255, 0, 0),
        Level::Warn => "WARN".truecolor(255, 165, 0),
        Level::Info => "INFO".truecolor(0, 255, 255),
        Level::Debug => "DEBUG".truecolor(138, 43, 226),
        Level::Trace => "TRACE".truecolor(255, 105, 180),
    }
}

fn format_log(buf: &mut Formatter, record: &Record) -> std::io::Result<()> {
    writeln!(
        buf,
        "{} [{}] {} - {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        level_tag(record.level()),
        record.target().dimmed(),
        record.args()
    )
}

const BANNER: [&str; 6] = [
    "██████╗ ██████╗ ██████╗ ",
    "██╔══██╗██╔══██╗██╔══██╗",
    "██████╔╝██████╔╝██║  ██║",
    "██╔══██╗██╔══██╗██║  ██║",
    "██████╔╝██║  ██║██████╔╝",
    "╚═════╝ ╚═╝  ╚═╝╚═════╝ ",
];

// Top to bottom: blue to cyan.
const GRADIENT: [(u8, u8, u8); 6] = [
    (37, 99, 235),
    (59, 111, 240),
    (63, 156, 255),
    (40, 180, 250),
    (20, 205, 240),
    (0, 230, 230),
];

pub fn print_banner(host: &str, port: u16, storage: &str, provider: &str) {
    let border = "=".repeat(60);
    println!("{}", border.blue());
    for (line, (r, g, b)) in BANNER.iter().zip(GRADIENT) {
        println!("    {}", line.truecolor(r, g, b));
    }
    println!();
    println!("{}", "Requirements intake is running".green());
    println!("{}", format!("   - Address:  http://{}:{}", host, port).cyan());
    println!("{}", format!("   - Storage:  {}", storage).cyan());
    println!("{}", format!("   - Provider: {}", provider).cyan());
    println!("{}", border.blue());
}
