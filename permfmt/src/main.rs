//! Print permission annotations, one annotation per line.

use clap::Parser;
use logos::Logos;
use perm_parse::Token;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Clone, Debug, Parser)]
pub struct Opt {
    /// Only lex instead of parse
    #[arg(long)]
    tokens: bool,
    /// Fail if some annotation does not parse.
    #[arg(long)]
    check: bool,
    /// Print nothing.
    #[arg(long)]
    quiet: bool,

    /// Files with one annotation per line; standard input if none or "-"
    files: Vec<PathBuf>,
}

fn no_space_after(token: &Token) -> bool {
    matches!(token, Token::LPar | Token::Hash | Token::Slash)
}

fn no_space_before(token: &Token) -> bool {
    matches!(token, Token::RPar | Token::Comma | Token::Frame | Token::Slash)
}

fn print_tokens(line: &str) {
    let mut space = false;
    for token in Token::lexer(line).filter(|t| *t != Token::Space) {
        if token == Token::Error {
            print!(" <error>");
            space = true;
            continue;
        }
        if space && !no_space_before(&token) {
            print!(" ");
        }
        print!("{}", token);
        space = !no_space_after(&token);
    }
    println!();
}

/// Print an annotation and return whether it is well-formed.
fn process(line: &str, opt: &Opt) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    if opt.tokens {
        log::info!("annotation lexed");
        if !opt.quiet {
            print_tokens(line)
        }
        return true;
    }
    match perm_parse::parse::<&str>(line) {
        Ok(expr) => {
            log::info!("annotation parsed");
            if !opt.quiet {
                println!("{}", expr)
            }
            true
        }
        Err(e) => {
            log::error!("{}: {}", line.trim(), e);
            false
        }
    }
}

fn process_lines(read: impl BufRead, opt: &Opt) -> io::Result<bool> {
    let mut ok = true;
    for line in read.lines() {
        ok &= process(&line?, opt);
    }
    Ok(ok)
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env("LOG").init();

    let opt = Opt::parse();

    let stdin = opt.files.is_empty() || opt.files.iter().any(|p| p.as_os_str() == "-");
    let mut ok = true;
    for path in opt.files.iter().filter(|p| p.as_os_str() != "-") {
        log::info!("reading {}", path.display());
        let file = std::fs::File::open(path)?;
        ok &= process_lines(BufReader::new(file), &opt)?;
    }
    if stdin {
        ok &= process_lines(io::stdin().lock(), &opt)?;
    }

    if opt.check && !ok {
        std::process::exit(1)
    }
    Ok(())
}
