use std::fs;
use std::path::PathBuf;

use reedline::{DefaultPrompt, Reedline, Signal};
use reasoner::persistence::Hybrid;
use reasoner::shapes::PROPERTY_PATH_MAX_DEPTH;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "reasoner-repl.toml";

#[derive(Deserialize)]
struct ReplConfig {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default = "default_timeout_ms")]
    default_query_timeout_ms: u64,
    #[serde(default = "default_property_path_depth")]
    property_path_depth: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/graph.bin")
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_property_path_depth() -> usize {
    PROPERTY_PATH_MAX_DEPTH
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_query_timeout_ms: default_timeout_ms(),
            property_path_depth: default_property_path_depth(),
        }
    }
}

fn load_config() -> ReplConfig {
    match fs::read_to_string(CONFIG_FILE) {
        Ok(text) => toml::from_str(&text).unwrap_or_else(|e| {
            eprintln!("[!] Could not parse {CONFIG_FILE}: {e}. Using defaults.");
            ReplConfig::default()
        }),
        Err(_) => ReplConfig::default(),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :save              fsync the delta journal");
    println!("  :compact           fold the journal into a fresh base snapshot");
    println!("  :stats             fact/base/delta counts");
    println!("  :quit | :q         exit (journal is fsynced first)");
    println!("  assert S P O       add a ground triple");
    println!("  anything else      run as a REQL query");
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    println!("==========================================");
    println!(" reasoner — in-memory DL reasoning engine  ");
    println!("==========================================");

    let config = load_config();
    if config.property_path_depth != PROPERTY_PATH_MAX_DEPTH {
        tracing::warn!(
            configured = config.property_path_depth,
            fixed = PROPERTY_PATH_MAX_DEPTH,
            "property_path_depth is fixed at compile time and cannot be overridden"
        );
    }

    if let Some(parent) = config.data_dir.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = fs::create_dir_all(parent);
        }
    }

    println!("Opening graph at {}...", config.data_dir.display());
    let mut hybrid = match Hybrid::open(&config.data_dir) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("[!] Failed to open {}: {e}", config.data_dir.display());
            return;
        }
    };
    println!(
        "Loaded {} base facts, {} delta facts ({} deleted).",
        hybrid.base_fact_count(),
        hybrid.delta_fact_count(),
        hybrid.deleted_fact_count()
    );
    print_help();

    let mut line_editor = Reedline::create();
    let prompt = DefaultPrompt::default();

    loop {
        let sig = line_editor.read_line(&prompt);
        match sig {
            Ok(Signal::Success(buffer)) => {
                let input = buffer.trim();
                if input.is_empty() {
                    continue;
                }

                match input {
                    ":quit" | ":q" => break,
                    ":help" | ":h" => {
                        print_help();
                        continue;
                    }
                    ":save" => {
                        match hybrid.save() {
                            Ok(()) => println!("journal fsynced."),
                            Err(e) => eprintln!("[!] save failed: {e}"),
                        }
                        continue;
                    }
                    ":compact" => {
                        match hybrid.compact() {
                            Ok(()) => println!(
                                "compacted: {} base facts, journal reset.",
                                hybrid.base_fact_count()
                            ),
                            Err(e) => eprintln!("[!] compact failed: {e}"),
                        }
                        continue;
                    }
                    ":stats" => {
                        println!(
                            "base={} delta={} deleted={} total={}",
                            hybrid.base_fact_count(),
                            hybrid.delta_fact_count(),
                            hybrid.deleted_fact_count(),
                            hybrid.fact_count()
                        );
                        continue;
                    }
                    _ => {}
                }

                if let Some(rest) = input.strip_prefix("assert ") {
                    let parts: Vec<&str> = rest.splitn(3, ' ').collect();
                    if parts.len() != 3 {
                        eprintln!("[!] usage: assert <subject> <predicate> <object>");
                        continue;
                    }
                    match hybrid.add_triple(parts[0], parts[1], parts[2]) {
                        Ok((id, added)) => {
                            if added {
                                println!("asserted fact #{id}");
                            } else {
                                println!("already known (fact #{id})");
                            }
                        }
                        Err(e) => eprintln!("[!] assertion rejected: {e}"),
                    }
                    continue;
                }

                match hybrid.network_mut().reql(input, config.default_query_timeout_ms) {
                    Ok(table) => {
                        println!("{} row(s)", table.num_rows());
                        for i in 0..table.num_rows() {
                            let row = table.row(i);
                            let rendered: Vec<String> =
                                row.into_iter().map(|c| c.unwrap_or_else(|| "NULL".to_string())).collect();
                            println!("  {}", rendered.join(" | "));
                        }
                    }
                    Err(e) => eprintln!("[!] query error: {e}"),
                }
            }
            Ok(Signal::CtrlD) | Ok(Signal::CtrlC) => {
                println!("Exiting.");
                break;
            }
            Err(err) => {
                eprintln!("[!] Error: {err:?}");
                break;
            }
        }
    }

    if let Err(e) = hybrid.close() {
        eprintln!("[!] failed to fsync journal on exit: {e}");
    }
}
