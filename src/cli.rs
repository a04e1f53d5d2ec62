use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

use serde_json::{json, Value};

use recall::parser::{self, Command};

const DEFAULT_HOST: &str = "127.0.0.1:50051";

fn main() {
    let addr = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_HOST.to_string());

    print_banner();

    match TcpStream::connect(&addr) {
        Ok(_) => println!("[\u{2713}] Connected to recall at {}!", addr),
        Err(_) => {
            println!("[\u{2717}] Could not reach a server at {}.", addr);
            println!("    Start one with 'recall --port <port>' first.");
            return;
        }
    }
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("recall> ");
        let _ = io::stdout().flush();
        buffer.clear();

        match stdin.read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() {
            continue;
        }

        match parser::parse_command(&buffer) {
            Ok(command) => {
                if let Err(e) = execute_command(&addr, command) {
                    println!("[\u{2717} Error] {}", e);
                }
            }
            Err(e) => println!("[\u{2717} Syntax Error] {}", e),
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   recall CLI - semantic memory client");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. ADD:     ADD \"content\" [CATEGORY \"name\"] [ID \"custom_id\"]");
    println!("2. SEARCH:  SEARCH \"query text\" [LIMIT 5]");
    println!("3. UPDATE:  UPDATE \"id\" \"new content\"");
    println!("4. REMOVE:  REMOVE \"id\"");
    println!("5. SET:     SET \"pref_key\" \"value\"");
    println!("6. GET:     GET \"pref_key\"");
    println!("7. EXIT:    Quit\n");
}

fn execute_command(addr: &str, command: Command) -> Result<(), String> {
    match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Exit => std::process::exit(0),

        Command::Add { content, category, id } => {
            let mut params = json!({ "content": content });
            if let Some(category) = category {
                params["category"] = json!(category);
            }
            if let Some(id) = id {
                params["id"] = json!(id);
            }
            let response = send(addr, "/add", params)?;
            expect_success(&response)?;
            println!(
                "[\u{2713} OK] Stored as {}",
                response.get("id").and_then(Value::as_str).unwrap_or("?")
            );
            Ok(())
        }

        Command::Search { query, limit } => {
            let response = send(addr, "/search", json!({ "query": query, "top_k": limit }))?;
            expect_success(&response)?;

            let empty = Vec::new();
            let results = response
                .get("results")
                .and_then(Value::as_array)
                .unwrap_or(&empty);

            println!("\nFound {} matches:", results.len());
            for hit in results {
                println!(
                    "  \u{2022} {} [{}] (score {:.4}) \"{}\"",
                    hit.get("id").and_then(Value::as_str).unwrap_or("?"),
                    hit.get("category").and_then(Value::as_str).unwrap_or("?"),
                    hit.get("score").and_then(Value::as_f64).unwrap_or(f64::NAN),
                    hit.get("content").and_then(Value::as_str).unwrap_or(""),
                );
            }
            println!();
            Ok(())
        }

        Command::Update { id, content } => {
            let response = send(addr, "/update", json!({ "id": id, "content": content }))?;
            expect_success(&response)?;
            println!("[\u{2713} OK] Updated.");
            Ok(())
        }

        Command::Remove { id } => {
            let response = send(addr, "/remove", json!({ "id": id }))?;
            expect_success(&response)?;
            println!("[\u{2713} OK] Removed.");
            Ok(())
        }

        Command::SetPref { key, value } => {
            let response =
                send(addr, "/update_preference", json!({ "key": key, "value": value }))?;
            expect_success(&response)?;
            println!("[\u{2713} OK] Preference saved.");
            Ok(())
        }

        Command::GetPref { key } => {
            let response = send(addr, "/get_preference", json!({ "key": key }))?;
            expect_success(&response)?;
            println!(
                "{} = \"{}\"",
                key,
                response.get("value").and_then(Value::as_str).unwrap_or("")
            );
            Ok(())
        }
    }
}

/// One-shot exchange: connect, write the envelope, half-close, read the
/// single JSON response to EOF.
fn send(addr: &str, endpoint: &str, params: Value) -> Result<Value, String> {
    let mut stream = TcpStream::connect(addr).map_err(|e| e.to_string())?;

    let request = json!({ "endpoint": endpoint, "params": params });
    stream
        .write_all(request.to_string().as_bytes())
        .map_err(|e| e.to_string())?;
    stream.shutdown(Shutdown::Write).map_err(|e| e.to_string())?;

    let mut response = String::new();
    stream.read_to_string(&mut response).map_err(|e| e.to_string())?;
    serde_json::from_str(&response).map_err(|e| format!("bad response: {e}"))
}

fn expect_success(response: &Value) -> Result<(), String> {
    if response.get("success").and_then(Value::as_bool) == Some(true) {
        Ok(())
    } else {
        Err(response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("server rejected request")
            .to_string())
    }
}
