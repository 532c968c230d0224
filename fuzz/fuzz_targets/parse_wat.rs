#![no_main]

use libfuzzer_sys::fuzz_target;

use wastfront::diagnostics::CollectingReporter;

fuzz_target!(|data: &[u8]| {
    // Invalid UTF-8 goes through the byte entry point's own error path.
    let mut reporter = CollectingReporter::new();
    let result = wastfront::parse_script_bytes(data, "fuzz.wast", &mut reporter);

    // Failure always comes with at least one diagnostic, success with none.
    match result {
        Ok(_) => assert!(reporter.diagnostics().is_empty()),
        Err(e) => assert_eq!(e.errors, reporter.diagnostics().len()),
    }
});
