use std::io::{stdout, Write};

use anyhow::{Context, Result};
use handlebars::handlebars_helper;
use sbw::decode::{Decoded, Summary};
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    filename: String,
    summary: &'a Summary,
}

pub fn report(filename: &str, decoded: &Decoded, format: &Format) -> Result<()> {
    let report = Report {
        filename: filename.to_string(),
        summary: &decoded.summary,
    };

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &report).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&report).context("rendering report")?;
            stdout()
                .write_all(str::as_bytes(&data))
                .context("writing to stdout")
        }
    }
}

fn render_text(report: &Report) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let mut num: usize = usize::try_from(num).unwrap();
        if num < v.len() {
            num = v.len();
        }
        let mut s = String::new();
        let padding = num - v.len();
        for _ in 0..padding {
            s.push(' ');
        }
        s.push_str(&v);
        s
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("report", TEXT_TEMPLATE)
        .context("registering template")?;

    hb.render("report", &report).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ filename }}
===============================================================================
Blocks:    {{ summary.blocks_seen }} seen, {{ summary.blocks_ok }} ok, {{ summary.blocks_skipped }} skipped
Bytes:     {{ summary.bytes_consumed }}
Records:   {{ summary.total_records }}
First:     {{ summary.first_timestamp }}
Last:      {{ summary.last_timestamp }}
{{ #if summary.cancelled }}Cancelled before end of input
{{ /if }}-------------------------------------------------------------------------------
Records by kind
{{ #each summary.records }}{{ lpad 14 @key }}   {{ this }}
{{ /each }}{{ #if summary.blocks_skipped }}-------------------------------------------------------------------------------
Skips by stage/reason
{{ #each summary.skipped }}{{ lpad 36 @key }}   {{ this }}
{{ /each }}{{ /if }}
";
