//! HTML for the single demo page.
//!
//! The page mirrors a two-column layout: a sidebar with usage notes and sample
//! prompts, and a main column with the tips, the input form and the output
//! region. All user-provided text goes through `html_escape` before it is
//! written into the markup.

use html_escape::{encode_double_quoted_attribute, encode_text};

pub const PAGE_TITLE: &str = "MaMaL-Gen Demo(代码生成)";
pub const HEADING: &str = "MaMaL-Gen(代码生成)";
pub const OUTPUT_HEADING: &str = "输出：";
pub const PLACEHOLDER: &str = "输出位置~~";
pub const GENERATE_BUTTON: &str = "生成";
pub const LOGO_PATH: &str = "/assets/panda23.png";

const MODEL_URL: &str = "https://huggingface.co/hanbin/MaMaL-Gen";

const TIPS: [&str; 3] = [
    "首次运行需要加载模型，可能需要一定的时间！",
    "左侧栏给出了一些good case 和 bad case，you can try it！",
    "不支持中文，输入过长，效果会变差。只支持Python语言",
];

pub const GOOD_CASES: [&str; 2] = ["Convert a SVG string to a QImage", "Try to seek to given offset"];
pub const BAD_CASES: [&str; 1] = ["Read an OpenAPI binary file ."];

const STYLE: &str = "body{font-family:sans-serif;margin:0;display:flex}\
aside{width:300px;padding:1rem;background:#f0f2f6;min-height:100vh}\
main{flex:1;max-width:760px;padding:2rem}\
blockquote{border-left:4px solid #ccc;margin:0.5rem 0;padding-left:0.75rem}\
textarea{width:100%;height:100px}\
pre{background:#f6f8fa;padding:0.75rem;overflow-x:auto}\
header{display:flex;align-items:center;gap:1rem}";

/// What the output region shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPanel<'a> {
    /// The trigger was not activated; nothing was generated.
    Placeholder,
    Generated(&'a str),
}

/// Renders the whole page with `input` pre-filled in the text area.
pub fn render_page(input: &str, panel: OutputPanel<'_>) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html lang=\"zh\"><head><meta charset=\"utf-8\">");
    html.push_str(&format!("<title>{}</title><style>{}</style></head><body>", PAGE_TITLE, STYLE));
    html.push_str(&render_sidebar());

    html.push_str("<main>");
    html.push_str(&format!(
        "<header><img src=\"{}\" width=\"100\" alt=\"logo\"><h1>{}</h1></header>",
        LOGO_PATH, HEADING
    ));
    for tip in TIPS {
        html.push_str(&format!("<blockquote><strong>Tip：</strong> {}</blockquote>", tip));
    }

    html.push_str("<h3>输入：</h3>");
    html.push_str("<form method=\"post\" action=\"/generate\">");
    html.push_str(&format!("<textarea name=\"input\">{}</textarea>", encode_text(input)));
    html.push_str(&format!(
        "<p><button type=\"submit\" name=\"trigger\" value=\"{}\">{}</button></p>",
        encode_double_quoted_attribute(GENERATE_BUTTON),
        GENERATE_BUTTON
    ));
    html.push_str("</form>");

    html.push_str("<section id=\"output\">");
    match panel {
        OutputPanel::Placeholder => {
            html.push_str(&format!("<h4 class=\"placeholder\">{}</h4>", PLACEHOLDER));
        }
        OutputPanel::Generated(output) => {
            html.push_str(&format!("<h3>{}</h3>", OUTPUT_HEADING));
            html.push_str(&render_code_block(output));
        }
    }
    html.push_str("</section></main></body></html>");
    html
}

fn render_code_block(code: &str) -> String {
    format!("<pre><code class=\"language-python\">{}</code></pre>", encode_text(code))
}

fn render_sidebar() -> String {
    let mut html = String::new();
    html.push_str("<aside>");
    html.push_str(&format!("<img src=\"{}\" width=\"270\" alt=\"logo\"><hr>", LOGO_PATH));
    html.push_str("<h2>使用方法：</h2>");
    html.push_str("<p>在【输入】文本框输入自然语言，点击【生成】按钮,即会生成想要的代码。</p>");
    html.push_str("<h2>注意事项：</h2>");
    html.push_str("<p>1）APP托管在外网上，请确保您可以全局科学上网。</p>");
    html.push_str(&format!(
        "<p>2）您可以下载<a href=\"{}\">MaMaL-Gen</a>模型，本地测试。（无需科学上网）</p><hr>",
        MODEL_URL
    ));

    html.push_str("<blockquote><strong>Good case：</strong></blockquote>");
    let good: Vec<String> = GOOD_CASES
        .iter()
        .enumerate()
        .map(|(i, case)| format!("{}){}", i + 1, case))
        .collect();
    html.push_str(&render_code_block(&good.join("\n")));

    html.push_str("<blockquote><strong>Bad cases：</strong></blockquote>");
    html.push_str(&render_code_block(&BAD_CASES.join("\n")));

    html.push_str(&format!(
        "<p>App 由 东北大学NLP课小组成员创建， 使用 Rust 和 <a href=\"{}\">MaMaL-Gen</a> 模型.</p>",
        MODEL_URL
    ));
    html.push_str("</aside>");
    html
}

/// Body of the 500 page shown when generation fails.
pub fn render_error_page(message: &str) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html lang=\"zh\"><head><meta charset=\"utf-8\">");
    html.push_str(&format!("<title>{}</title></head><body>", PAGE_TITLE));
    html.push_str("<div class=\"error-message\"><h2>Application error</h2>");
    html.push_str(&format!("<pre>{}</pre>", encode_text(message)));
    html.push_str("<p><a href=\"/\">Back</a></p></div></body></html>");
    html
}
