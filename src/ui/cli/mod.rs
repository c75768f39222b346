//! CLI - reedline-based console interface
//!
//! The interactive console: load a binary, apply symbol maps, inspect the
//! resulting function names.

use anyhow::Result;
use colored::Colorize;
use reedline::{
    Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal,
};
use std::borrow::Cow;

use crate::app::AppState;
use crate::db::PLACEHOLDER_PREFIX;
use crate::mapfile;

/// Custom prompt showing the size of the loaded database
pub struct MapparsePrompt {
    /// Number of functions in the database
    function_count: usize,
}

impl MapparsePrompt {
    pub fn new() -> Self {
        Self { function_count: 0 }
    }

    pub fn set_function_count(&mut self, count: usize) {
        self.function_count = count;
    }
}

impl Default for MapparsePrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for MapparsePrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        if self.function_count == 0 {
            Cow::Borrowed("[no db]")
        } else {
            Cow::Owned(format!("[{} fns]", self.function_count))
        }
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "(failed) ",
        };
        Cow::Owned(format!("(search: {}{}) ", prefix, history_search.term))
    }
}

/// Plain prompt used when asking for a file path
struct AskFilePrompt;

impl Prompt for AskFilePrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Borrowed("symbol map (*.sym, *.idasym, *.map)")
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed(": ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        _history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        Cow::Borrowed("")
    }
}

/// Command parsing result
#[derive(Debug, PartialEq, Eq)]
pub enum ParsedCommand {
    /// Load binary: o <path>
    Open(String),
    /// Apply a symbol map: sym [path] (no path: ask for one)
    ApplySym(Option<String>),
    /// Convert a linker map: export <in.map> <out.sym|out.idasym>
    Export(String, String),
    /// List functions: fl [filter]
    ListFunctions(Option<String>),
    /// Hex dump: px <addr> [len]
    HexDump(u64, usize),
    /// Show database/binary info: i
    Info,
    /// Help: ? or help
    Help,
    /// Quit: q or exit
    Quit,
    /// Unknown command
    Unknown(String),
}

/// Parse a command string into a structured command
fn parse_command(input: &str) -> ParsedCommand {
    let input = input.trim();
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts.first().unwrap_or(&"");
    let arg = parts.get(1).map(|s| s.trim());

    match *cmd {
        // File operations
        "o" | "open" | "load" => {
            if let Some(path) = arg {
                return ParsedCommand::Open(path.to_string());
            }
            ParsedCommand::Unknown(input.to_string())
        }

        // Symbol maps
        "sym" | "apply" => ParsedCommand::ApplySym(arg.map(str::to_string)),
        "export" | "conv" => {
            if let Some(arg) = arg {
                let mut words = arg.split_whitespace();
                if let (Some(input), Some(output)) = (words.next(), words.next()) {
                    return ParsedCommand::Export(input.to_string(), output.to_string());
                }
            }
            ParsedCommand::Unknown(input.to_string())
        }

        // Listing
        "fl" | "funcs" | "functions" => ParsedCommand::ListFunctions(arg.map(str::to_string)),

        // Memory
        "px" => {
            if let Some(arg) = arg {
                let mut words = arg.split_whitespace();
                if let Some(addr) = words.next().and_then(|s| parse_address(s).ok()) {
                    let len = words
                        .next()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(64);
                    return ParsedCommand::HexDump(addr, len);
                }
            }
            ParsedCommand::Unknown(input.to_string())
        }

        // Info
        "i" | "info" => ParsedCommand::Info,

        // Help
        "?" | "help" => ParsedCommand::Help,

        // Quit
        "q" | "quit" | "exit" => ParsedCommand::Quit,

        _ => ParsedCommand::Unknown(input.to_string()),
    }
}

/// Parse an address string (supports 0x prefix and decimal)
fn parse_address(s: &str) -> Result<u64, std::num::ParseIntError> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

/// Print the help message
fn print_help() {
    println!("{}", "mapparse console commands".bold().cyan());
    println!("{}", "═".repeat(50).cyan());

    println!("\n{}", "Files:".bold().yellow());
    println!("  {}        Open/load binary", "o <path>".green());
    println!("  {}    Apply symbol map (.sym/.idasym/.map, prompts if no path)", "sym [path]".green());
    println!("  {}  Convert linker map to .sym/.idasym", "export <in> <out>".green());

    println!("\n{}", "Database:".bold().yellow());
    println!("  {}   List functions (optional name filter)", "fl [filter]".green());
    println!("  {}             Show binary/database info", "i".green());

    println!("\n{}", "Memory:".bold().yellow());
    println!("  {}  Hex dump at address", "px <addr> [len]".green());

    println!("\n{}", "Other:".bold().yellow());
    println!("  {}             Show this help", "?".green());
    println!("  {}             Quit", "q".green());
}

/// Ask the user for a symbol map path. Empty input means cancellation.
fn ask_file(line_editor: &mut Reedline) -> Result<Option<String>> {
    match line_editor.read_line(&AskFilePrompt)? {
        Signal::Success(buffer) => {
            let path = buffer.trim();
            if path.is_empty() {
                Ok(None)
            } else {
                Ok(Some(path.to_string()))
            }
        }
        Signal::CtrlD | Signal::CtrlC => Ok(None),
    }
}

fn apply_symbols(state: &mut AppState, path: &str) {
    if !state.has_binary() {
        println!("{} No binary loaded - 'o <path>' first", "[!]".red());
        return;
    }

    println!("[*] Open File");
    match state.apply_symbols(path) {
        Ok(summary) => {
            println!("{}", summary.report());
            println!("[*] Now, switch your display to demangled names to see the result!");
        }
        Err(e) => println!("{} {:#}", "[!]".red(), e),
    }
}

fn hex_dump(state: &AppState, addr: u64, len: usize) {
    let Some(ref binary) = state.binary else {
        println!("{} No binary loaded", "[!]".red());
        return;
    };

    let Some(bytes) = binary.get_bytes(addr, len) else {
        println!("{} Address {:#x} not mapped", "[!]".red(), addr);
        return;
    };

    for (i, chunk) in bytes.chunks(16).enumerate() {
        let hex_part: Vec<String> = chunk.iter().map(|b| hex::encode([*b])).collect();
        let ascii: String = chunk
            .iter()
            .map(|b| {
                if (0x20..=0x7E).contains(b) {
                    *b as char
                } else {
                    '.'
                }
            })
            .collect();
        println!(
            "{:08x}  {:<47}  {}",
            addr + (i as u64) * 16,
            hex_part.join(" "),
            ascii
        );
    }
}

fn list_functions(state: &AppState, filter: Option<&str>) {
    if state.db.is_empty() {
        println!("{} No binary loaded", "[!]".red());
        return;
    }

    let mut shown = 0usize;
    for (addr, name) in state.db.iter() {
        if let Some(filter) = filter {
            if !name.contains(filter) {
                continue;
            }
        }
        if name.starts_with(PLACEHOLDER_PREFIX) {
            println!("  0x{:08x}  {}", addr, name.dimmed());
        } else {
            println!("  0x{:08x}  {}", addr, name.green());
        }
        shown += 1;
    }
    println!("[*] {} functions", shown);
}

/// Execute a parsed command. Returns true when the console should exit.
fn execute_command(
    cmd: ParsedCommand,
    state: &mut AppState,
    line_editor: &mut Reedline,
) -> Result<bool> {
    match cmd {
        ParsedCommand::Open(path) => {
            println!("[*] Loading binary: {}", path);
            match state.load_binary(&path) {
                Ok(()) => {
                    if let Some(ref binary) = state.binary {
                        println!("{}", binary.summary());
                    }
                }
                Err(e) => println!("{} {:#}", "[!]".red(), e),
            }
        }
        ParsedCommand::ApplySym(path) => {
            let path = match path {
                Some(path) => Some(path),
                None => ask_file(line_editor)?,
            };
            match path {
                Some(path) => apply_symbols(state, &path),
                None => println!("{} No file selected!", "[!]".red()),
            }
        }
        ParsedCommand::Export(input, output) => match mapfile::convert(&input, &output) {
            Ok(count) => println!("[*] Exported {} records to {}", count, output),
            Err(e) => println!("{} {:#}", "[!]".red(), e),
        },
        ParsedCommand::ListFunctions(filter) => {
            list_functions(state, filter.as_deref());
        }
        ParsedCommand::HexDump(addr, len) => {
            hex_dump(state, addr, len);
        }
        ParsedCommand::Info => match state.binary {
            Some(ref binary) => {
                if let Some(path) = state.binary_path() {
                    println!("[*] {}", path);
                }
                println!("{}", binary.summary());
                if let Some(summary) = state.last_summary {
                    println!("{}", summary.report());
                }
            }
            None => println!("{} No binary loaded", "[!]".red()),
        },
        ParsedCommand::Help => {
            print_help();
        }
        ParsedCommand::Quit => {
            println!("[*] Shutting down...");
            return Ok(true);
        }
        ParsedCommand::Unknown(input) => {
            println!("{} Unknown command: '{}'", "[!]".red(), input);
            println!("    Type '?' for help");
        }
    }
    Ok(false)
}

/// Run the interactive console
pub fn run_cli(mut state: AppState) -> Result<()> {
    let mut line_editor = Reedline::create();
    let mut prompt = MapparsePrompt::new();

    println!(
        "{}",
        "╔══════════════════════════════════════════════════════════════╗".cyan()
    );
    println!(
        "{}",
        "║  mapparse console - Type '?' for help, 'q' to quit           ║".cyan()
    );
    println!(
        "{}",
        "╚══════════════════════════════════════════════════════════════╝".cyan()
    );

    loop {
        prompt.set_function_count(state.function_count());

        let sig = line_editor.read_line(&prompt)?;
        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();
                if input.is_empty() {
                    continue;
                }

                let cmd = parse_command(input);
                if execute_command(cmd, &mut state, &mut line_editor)? {
                    break;
                }
            }
            Signal::CtrlD | Signal::CtrlC => {
                println!("\n[*] Interrupted");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_open_command() {
        assert_eq!(
            parse_command("o /tmp/a.exe"),
            ParsedCommand::Open("/tmp/a.exe".into())
        );
        assert!(matches!(parse_command("open"), ParsedCommand::Unknown(_)));
    }

    #[test]
    fn parse_sym_command() {
        assert_eq!(
            parse_command("sym dump.sym"),
            ParsedCommand::ApplySym(Some("dump.sym".into()))
        );
        assert_eq!(parse_command("sym"), ParsedCommand::ApplySym(None));
    }

    #[test]
    fn parse_export_command() {
        assert_eq!(
            parse_command("export game.map game.idasym"),
            ParsedCommand::Export("game.map".into(), "game.idasym".into())
        );
        assert!(matches!(
            parse_command("export game.map"),
            ParsedCommand::Unknown(_)
        ));
    }

    #[test]
    fn parse_px_command() {
        assert_eq!(parse_command("px 0x1000"), ParsedCommand::HexDump(0x1000, 64));
        assert_eq!(parse_command("px 4096 32"), ParsedCommand::HexDump(4096, 32));
        assert!(matches!(parse_command("px"), ParsedCommand::Unknown(_)));
    }

    #[test]
    fn parse_address_forms() {
        assert_eq!(parse_address("0x10").unwrap(), 16);
        assert_eq!(parse_address("16").unwrap(), 16);
        assert!(parse_address("zz").is_err());
    }
}
