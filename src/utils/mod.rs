pub mod file;
pub mod text;
pub mod time;

pub use file::{list_json_files, FileEntry};
pub use text::{pad_to_width, render_table};
pub use time::{current_human_timestamp, date_range, format_date, parse_date, today};
