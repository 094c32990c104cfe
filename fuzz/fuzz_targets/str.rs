#![no_main]
use libfuzzer_sys::fuzz_target;

use tap2junit::{JunitWriter, TapParser};

fuzz_target!(|data: &str| {
    let mut parser = TapParser::new();
    if let Ok(results) = parser.parse(data) {
        let counts = results.counts();
        assert_eq!(counts.passed + counts.failed + counts.skipped, counts.tests);
        JunitWriter::new("fuzz")
            .to_string(&results)
            .expect("writing to memory cannot fail");
    }
});
