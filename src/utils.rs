/// Initialize logging for native use, replacing the teacher's wasm console
/// hooks (`console_error_panic_hook`/`console_log`) with `env_logger` — this
/// crate is not a wasm front-end, so the logging backend follows `log`
/// call sites everywhere else in the crate but wires to stderr instead of
/// the browser console.
pub fn init() {
    let _ = env_logger::try_init();
}
