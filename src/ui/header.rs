use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::connectivity::{ConnectivityState, Transport};

/// Draw the header bar with logo, remote, user, connectivity and shortcuts
pub fn draw_header(
  frame: &mut Frame,
  area: Rect,
  remote_url: &str,
  user_id: &str,
  connectivity: &ConnectivityState,
) {
  let domain = extract_domain(remote_url);

  let (online_label, online_color) = if connectivity.is_online {
    ("online", Color::Green)
  } else {
    ("offline", Color::Red)
  };
  let transports = connectivity
    .transports
    .iter()
    .filter(|t| **t != Transport::None)
    .map(|t| t.as_str())
    .collect::<Vec<_>>()
    .join(",");

  let header = Line::from(vec![
    Span::styled(" finlytic ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", domain), Style::default().fg(Color::White)),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" {} ", user_id),
      Style::default().fg(Color::Yellow).bold(),
    ),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" {} ", online_label),
      Style::default().fg(online_color).bold(),
    ),
    Span::styled(transports, Style::default().fg(Color::DarkGray)),
    Span::raw("  "),
    // Shortcuts - keys highlighted, descriptions dimmed
    Span::styled("<s>", Style::default().fg(Color::Cyan)),
    Span::styled(" sync", Style::default().fg(Color::DarkGray)),
    Span::raw("   "),
    Span::styled("<f>", Style::default().fg(Color::Cyan)),
    Span::styled(" full sync", Style::default().fg(Color::DarkGray)),
    Span::raw("   "),
    Span::styled("<q>", Style::default().fg(Color::Cyan)),
    Span::styled(" quit", Style::default().fg(Color::DarkGray)),
  ]);

  let paragraph = Paragraph::new(header).style(Style::default().bg(Color::Black));

  frame.render_widget(paragraph, area);
}

/// Extract the host from the remote url
fn extract_domain(url: &str) -> &str {
  url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url)
    .split('/')
    .next()
    .unwrap_or(url)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_extract_domain() {
    assert_eq!(
      extract_domain("https://api.finlytic.app/v1"),
      "api.finlytic.app"
    );
    assert_eq!(extract_domain("http://localhost:8080"), "localhost:8080");
    assert_eq!(extract_domain("no remote"), "no remote");
  }
}
