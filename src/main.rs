//! ChatVault 命令行入口
//!
//! 提供最小可用的 CLI：
//!
//! 用法：
//!   chatvault extract <backup> <outdir> <password> [--skip-...]
//!   chatvault decrypt <backup> <output.db> <password>
//!   chatvault analyse <backup> <password>
//!
//! 设计原则：
//! - 不依赖 clap / structopt
//! - 参数解析保持「一眼能懂」
//! - 所有实际逻辑都委托给库接口
//!
//! 退出码：0 成功；1 任何库层错误；2 处理过程中发生 panic。

use std::env;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::exit;

use chatvault::ExtractOptions;

fn print_usage() {
    eprintln!(
        "Usage:\n  \
         chatvault extract <backup> <outdir> <password>\n  \
         chatvault decrypt <backup> <output.db> <password>\n  \
         chatvault analyse <backup> <password>\n\n\
         Options:\n  \
         --password-file FILE   read the password from FILE instead\n  \
         --skip-database --skip-attachments --skip-avatars\n  \
         --skip-stickers --skip-settings\n  \
         -v, --verbose          enable progress logging"
    );
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut positional: Vec<String> = Vec::new();
    let mut password_file: Option<String> = None;
    let mut verbose = false;
    let mut options = ExtractOptions::default();

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            "--password-file" => match it.next() {
                Some(path) => password_file = Some(path.clone()),
                None => {
                    eprintln!("Error: --password-file needs a value");
                    print_usage();
                    exit(1);
                }
            },
            "--skip-database" => options.database = false,
            "--skip-attachments" => options.attachments = false,
            "--skip-avatars" => options.avatars = false,
            "--skip-stickers" => options.stickers = false,
            "--skip-settings" => options.settings = false,
            "-h" | "--help" => {
                print_usage();
                exit(0);
            }
            _ if arg.starts_with('-') => {
                eprintln!("Error: unknown option {arg}");
                print_usage();
                exit(1);
            }
            _ => positional.push(arg.clone()),
        }
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if verbose { "info" } else { "warn" }),
    )
    .init();

    if positional.len() < 2 {
        print_usage();
        exit(1);
    }
    let command = positional[0].as_str();
    let input = Path::new(&positional[1]);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match command {
        "extract" => {
            let Some(outdir) = positional.get(2) else {
                print_usage();
                exit(1);
            };
            let password = read_password(&positional, 3, &password_file);
            chatvault::extract(input, Path::new(outdir), &password, options)
        }
        "decrypt" => {
            let Some(output) = positional.get(2) else {
                print_usage();
                exit(1);
            };
            let password = read_password(&positional, 3, &password_file);
            chatvault::decrypt(input, Path::new(output), &password)
        }
        "analyse" | "analyze" => {
            let password = read_password(&positional, 2, &password_file);
            chatvault::analyse(input, &password).map(|report| {
                println!("Password valid, file OK");
                print!("{report}");
            })
        }
        _ => {
            print_usage();
            exit(1);
        }
    }));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("Error: {e}");
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            exit(1);
        }
        Err(_) => exit(2),
    }
}

fn read_password(positional: &[String], index: usize, password_file: &Option<String>) -> String {
    if let Some(path) = password_file {
        match std::fs::read_to_string(path) {
            Ok(contents) => return contents.trim().to_string(),
            Err(e) => {
                eprintln!("Error: unable to read password file: {e}");
                exit(1);
            }
        }
    }
    match positional.get(index) {
        Some(password) => password.clone(),
        None => {
            eprintln!("Error: no password given");
            print_usage();
            exit(1);
        }
    }
}
