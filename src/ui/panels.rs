use chrono::Utc;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Row, Table};

use super::utils::{ago, state_color, truncate};
use crate::errors::ErrorEvent;
use crate::sync::{PendingSyncItem, SyncStatus};

/// Sync state, counters and the last pass's failures
pub fn draw_status(frame: &mut Frame, area: Rect, status: &SyncStatus) {
  let block = Block::default()
    .title(" Sync ")
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let mut lines = vec![
    Line::from(vec![
      Span::styled(
        format!("{:<10}", status.state.as_str()),
        Style::default().fg(state_color(status.state)).bold(),
      ),
      Span::raw(format!(
        "{}/{} synced  {} failed  {} deferred",
        status.synced_items, status.total_items, status.failed_items, status.deferred_items
      )),
    ]),
    Line::from(Span::styled(
      format!("last sync: {}", ago(status.last_sync_at, Utc::now())),
      Style::default().fg(Color::DarkGray),
    )),
  ];

  for error in status.errors.iter().take(3) {
    let label = if error.dropped { "dropped" } else { "retry" };
    lines.push(Line::from(vec![
      Span::styled(format!("{:<8}", label), Style::default().fg(Color::Red)),
      Span::raw(format!(
        "{} {} #{}: {}",
        error.operation,
        error.entity_kind,
        error.attempt,
        truncate(&error.message, 60)
      )),
    ]));
  }

  frame.render_widget(Paragraph::new(lines).block(block), area);
}

/// Pending queue in replay order
pub fn draw_pending(frame: &mut Frame, area: Rect, pending: &[PendingSyncItem]) {
  let block = Block::default()
    .title(format!(" Pending ({}) ", pending.len()))
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  if pending.is_empty() {
    let paragraph = Paragraph::new("Queue is empty.")
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let now = Utc::now();
  let rows: Vec<Row> = pending
    .iter()
    .map(|item| {
      let retry_style = if item.retry_count > 0 {
        Style::default().fg(Color::Yellow)
      } else {
        Style::default()
      };
      Row::new(vec![
        Span::styled(item.operation.to_string(), Style::default().fg(Color::Cyan)),
        Span::raw(item.entity_kind.to_string()),
        Span::raw(truncate(&item.entity_id, 36)),
        Span::styled(item.retry_count.to_string(), retry_style),
        Span::styled(ago(Some(item.enqueued_at), now), Style::default().fg(Color::DarkGray)),
      ])
    })
    .collect();

  let widths = [
    Constraint::Length(8),
    Constraint::Length(10),
    Constraint::Min(20),
    Constraint::Length(7),
    Constraint::Length(10),
  ];
  let header = Row::new(vec!["OP", "KIND", "RECORD", "RETRIES", "QUEUED"])
    .style(Style::default().fg(Color::DarkGray).bold());

  let table = Table::new(rows, widths).header(header).block(block);
  frame.render_widget(table, area);
}

/// Most recent reported errors, newest first
pub fn draw_errors(frame: &mut Frame, area: Rect, errors: &[ErrorEvent]) {
  let block = Block::default()
    .title(" Errors ")
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let items: Vec<ListItem> = errors
    .iter()
    .rev()
    .map(|event| {
      let count = if event.is_burst {
        format!("x{} ", event.count)
      } else {
        String::new()
      };
      ListItem::new(Line::from(vec![
        Span::styled(
          event.occurred_at.format("%H:%M:%S ").to_string(),
          Style::default().fg(Color::DarkGray),
        ),
        Span::styled(
          format!("{:<11}", event.category.as_str()),
          Style::default().fg(Color::Red),
        ),
        Span::styled(count, Style::default().fg(Color::Yellow).bold()),
        Span::raw(truncate(&event.message, 80)),
      ]))
    })
    .collect();

  frame.render_widget(List::new(items).block(block), area);
}
