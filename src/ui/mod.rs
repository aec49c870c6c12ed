mod header;
mod panels;
mod utils;

use crate::app::App;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1),      // Header
      Constraint::Length(7),      // Sync status
      Constraint::Min(5),         // Pending queue
      Constraint::Percentage(30), // Errors
      Constraint::Length(1),      // Status bar
    ])
    .split(frame.area());

  header::draw_header(
    frame,
    chunks[0],
    app.remote_url(),
    app.user_id(),
    app.connectivity(),
  );
  panels::draw_status(frame, chunks[1], app.status());
  panels::draw_pending(frame, chunks[2], app.pending());
  panels::draw_errors(frame, chunks[3], app.recent_errors());
  draw_status_bar(frame, chunks[4], app);
}

fn draw_status_bar(frame: &mut Frame, area: Rect, app: &App) {
  let (content, style) = match app.notice() {
    Some(notice) => (format!(" {}", notice), Style::default().fg(Color::Yellow)),
    None => (
      " s:sync  f:full sync  q:quit".to_string(),
      Style::default().fg(Color::DarkGray),
    ),
  };

  let paragraph = Paragraph::new(content).style(style);
  frame.render_widget(paragraph, area);
}
