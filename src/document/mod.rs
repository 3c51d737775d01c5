pub mod diagram;
pub mod markdown;

pub use diagram::generate as generate_diagram;
pub use markdown::{markdown_to_html, render_markdown};
