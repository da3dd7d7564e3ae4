//! Writing Task 1 visuals: CSV tables parsed locally, image prompts for everything else.

use serde::Serialize;

use crate::domain::ChartSpec;

/// Parsed table data, or a marker that the raw data could not form a table.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableRender {
  Table { headers: Vec<String>, rows: Vec<Vec<String>> },
  Invalid,
}

/// Header row first, comma-separated. Fewer than two non-empty lines is not a table.
pub fn parse_table(raw: &str) -> TableRender {
  let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
  if lines.len() < 2 {
    return TableRender::Invalid;
  }
  let split = |line: &str| line.split(',').map(|cell| cell.trim().to_string()).collect::<Vec<_>>();
  TableRender::Table {
    headers: split(lines[0]),
    rows: lines[1..].iter().map(|l| split(l)).collect(),
  }
}

fn escape_html(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for ch in s.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      _ => out.push(ch),
    }
  }
  out
}

/// HTML fragment for a table chart; invalid data renders as a notice instead of failing.
pub fn table_html(raw: &str) -> String {
  match parse_table(raw) {
    TableRender::Invalid => "<p class=\"chart-invalid\">Invalid table data.</p>".into(),
    TableRender::Table { headers, rows } => {
      let mut out = String::from("<table><thead><tr>");
      for h in &headers {
        out.push_str(&format!("<th>{}</th>", escape_html(h)));
      }
      out.push_str("</tr></thead><tbody>");
      for row in &rows {
        out.push_str("<tr>");
        for cell in row {
          out.push_str(&format!("<td>{}</td>", escape_html(cell)));
        }
        out.push_str("</tr>");
      }
      out.push_str("</tbody></table>");
      out
    }
  }
}

/// Text prompt for the image-generation request.
pub fn image_prompt(chart: &ChartSpec) -> String {
  format!(
    "A clean, academic-style {kind} chart titled \"{title}\", as used in an IELTS Academic Writing Task 1. \
     White background, clearly labelled axes and legend, no decorative elements. Data: {data}",
    kind = chart.kind.as_str(),
    title = chart.title.trim(),
    data = chart.data.trim(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ChartKind;

  #[test]
  fn parses_header_and_body_rows() {
    let parsed = parse_table("Year,Revenue\n2022,5M\n2023,8M");
    assert_eq!(
      parsed,
      TableRender::Table {
        headers: vec!["Year".into(), "Revenue".into()],
        rows: vec![vec!["2022".into(), "5M".into()], vec!["2023".into(), "8M".into()]],
      }
    );
  }

  #[test]
  fn blank_lines_do_not_count() {
    assert_eq!(parse_table("Year,Revenue\n\n   \n"), TableRender::Invalid);
    assert_eq!(parse_table(""), TableRender::Invalid);
    assert!(matches!(parse_table("\nA,B\n\n1,2\n"), TableRender::Table { .. }));
  }

  #[test]
  fn invalid_table_renders_notice() {
    assert!(table_html("only a header").contains("Invalid table"));
  }

  #[test]
  fn html_cells_are_escaped() {
    let html = table_html("Name,Note\n<b>,a&b");
    assert!(html.contains("<td>&lt;b&gt;</td>"));
    assert!(html.contains("<td>a&amp;b</td>"));
    assert!(html.starts_with("<table><thead><tr><th>Name</th>"));
  }

  #[test]
  fn image_prompt_mentions_chart_details() {
    let chart = ChartSpec { kind: ChartKind::Pie, title: "Energy mix".into(), data: "Coal 40%, Gas 35%".into() };
    let p = image_prompt(&chart);
    assert!(p.contains("pie chart"));
    assert!(p.contains("Energy mix"));
    assert!(p.contains("Coal 40%"));
  }
}
