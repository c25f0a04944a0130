use std::ffi::{c_char, CStr, CString};
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::pipeline::{ConfigOverrides, PipelineConfig, TranslatorPipeline};
use crate::progress::ConsoleProgress;

static LAST_ERROR: Lazy<Mutex<Option<CString>>> = Lazy::new(|| Mutex::new(None));

fn set_last_error(msg: &str) {
    let c = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    let mut guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    *guard = Some(c);
}

fn clear_last_error() {
    let mut guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    *guard = None;
}

fn take_cstr(ptr: *const c_char, name: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("{name} is null"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|s| s.to_string())
        .map_err(|_| format!("{name} is not valid UTF-8"))
}

/// Translate an HTML file using the given `page-translator.toml`.
///
/// Returns 0 when every unit was applied, 1 when the page was written but some
/// units failed, and another non-zero code on hard failure (see `pt_last_error_utf8()`).
#[no_mangle]
pub extern "C" fn pt_translate_html(
    config_path: *const c_char,
    input_html: *const c_char,
    output_html: *const c_char,
) -> i32 {
    clear_last_error();
    let cfg = match take_cstr(config_path, "config_path") {
        Ok(v) => v,
        Err(e) => {
            set_last_error(&e);
            return 2;
        }
    };
    let input = match take_cstr(input_html, "input_html") {
        Ok(v) => v,
        Err(e) => {
            set_last_error(&e);
            return 3;
        }
    };
    let output = match take_cstr(output_html, "output_html") {
        Ok(v) => v,
        Err(e) => {
            set_last_error(&e);
            return 4;
        }
    };

    let input = PathBuf::from(input);
    let output = PathBuf::from(output);
    let overrides = ConfigOverrides {
        config_path: Some(PathBuf::from(cfg)),
        ..Default::default()
    };

    let cfg = match PipelineConfig::from_paths_and_args(&input, &overrides) {
        Ok(v) => v,
        Err(err) => {
            set_last_error(&format!("{err:#}"));
            return 10;
        }
    };

    let pipeline = TranslatorPipeline::new(cfg, ConsoleProgress::new(false));
    match pipeline.translate_file(&input, &output) {
        Ok(summary) => match summary.error {
            Some(err) => {
                set_last_error(&err);
                12
            }
            None if summary.errored > 0 => {
                set_last_error(&summary.status_line());
                1
            }
            None => 0,
        },
        Err(err) => {
            set_last_error(&format!("{err:#}"));
            11
        }
    }
}

/// Returns the last error message as a UTF-8 C string pointer (or null if none).
/// The pointer is valid until the next `pt_translate_html` call.
#[no_mangle]
pub extern "C" fn pt_last_error_utf8() -> *const c_char {
    let guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    match guard.as_ref() {
        Some(s) => s.as_ptr(),
        None => std::ptr::null(),
    }
}
