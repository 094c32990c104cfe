use tap2junit::TapParser;

// Dumps the parsed results of a TAP file, with their counts, as JSON.
fn main() {
    let file = std::env::args().nth(1).unwrap();
    let document = std::fs::read_to_string(file).unwrap();

    let mut parser = TapParser::new();
    let results = match parser.parse(&document) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("malformed TAP: {e}");
            parser.into_result_set()
        }
    };

    let report = serde_json::json!({
        "counts": results.counts(),
        "duration_secs": results.duration().as_secs_f64(),
        "results": results,
    });
    println!("{}", serde_json::to_string_pretty(&report).unwrap());
}
