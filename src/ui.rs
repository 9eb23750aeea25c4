use crate::{
    client::AppSnapshot,
    contract::TxKind,
    gateway::SigningPrompt,
    identity_hex,
    orchestrator::TxPhase,
    short_identity,
    state::{
        Role,
        UiState as LotteryState,
    },
    view::{
        Field,
        Snapshot,
    },
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        self,
        Event,
        KeyCode,
        KeyEventKind,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;
use tokio::sync::mpsc;
use tracing::warn;

/// Decimals of the base asset on Fuel networks.
const BASE_ASSET_DECIMALS: u32 = 9;

#[derive(Debug, Eq, PartialEq)]
pub enum UserEvent {
    Quit,
    Redraw,
    ToggleView,
    NextAccount,
    Act,
    Refresh,
    Signed { kind: TxKind, approved: bool },
}

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

#[derive(Debug, Default)]
enum Mode {
    #[default]
    Normal,
    QuitModal,
    Signing(SigningPrompt),
}

impl UiState {
    pub fn is_signing(&self) -> bool {
        matches!(self.mode, Mode::Signing(_))
    }

    /// Shows the signing modal. A prompt arriving while another is open is handed back.
    pub fn open_signing(&mut self, prompt: SigningPrompt) -> Result<(), SigningPrompt> {
        if self.is_signing() {
            return Err(prompt);
        }
        self.mode = Mode::Signing(prompt);
        Ok(())
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableMouseCapture
    )?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::event::DisableMouseCapture,
        crossterm::terminal::LeaveAlternateScreen
    )?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

pub type InputEventReceiver = mpsc::UnboundedReceiver<std::io::Result<Event>>;

/// Reads terminal events on a dedicated thread so the async loop never blocks on them.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            let event = event::read();
            let failed = event.is_err();
            if tx.send(event).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub async fn next_raw_event(events: &mut InputEventReceiver) -> Result<Event> {
    let event = events
        .recv()
        .await
        .ok_or_else(|| eyre!("terminal input stream closed"))??;
    Ok(event)
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let Event::Key(k) = event else {
        return matches!(event, Event::Resize(..)).then_some(UserEvent::Redraw);
    };
    if k.kind != KeyEventKind::Press {
        return None;
    }
    match &state.mode {
        Mode::Signing(_) => {
            let approved = match k.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => true,
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => false,
                _ => return None,
            };
            let Mode::Signing(prompt) = std::mem::take(&mut state.mode) else {
                return None;
            };
            let kind = prompt.request.kind;
            prompt.respond(approved);
            return Some(UserEvent::Signed { kind, approved });
        }
        Mode::QuitModal => {
            return match k.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::Normal => {}
    }
    match k.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Tab => Some(UserEvent::ToggleView),
        KeyCode::Char('a') => Some(UserEvent::NextAccount),
        KeyCode::Enter | KeyCode::Char(' ') => Some(UserEvent::Act),
        KeyCode::Char('r') => Some(UserEvent::Refresh),
        _ => None,
    }
}

fn ui(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // account + network
            Constraint::Min(9),    // lottery view
            Constraint::Length(7), // status/errors
            Constraint::Length(3), // help
        ])
        .split(f.area());

    draw_header(f, chunks[0], snap);
    match snap.role {
        Role::Entrant => draw_entrant_view(f, chunks[1], snap),
        Role::Owner => draw_owner_view(f, chunks[1], snap),
    }
    draw_status(f, chunks[2], snap);
    draw_help(f, chunks[3]);
    draw_modals(f, state, snap);
}

fn draw_header(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let account = match &snap.account {
        Some((name, identity)) => format!("{name} ({})", short_identity(identity)),
        None => "Not connected".to_string(),
    };
    let height = snap
        .snapshot
        .view()
        .and_then(|v| v.block_height())
        .map(|h| h.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let text = format!(
        "Account: {} | Network: {} | Contract: {} | Block: {}",
        account,
        snap.network,
        short_contract(&snap.contract_id),
        height
    );
    let widget =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Lottery"));
    f.render_widget(widget, area);
}

/// Blocking message for snapshots that cannot back a view.
fn snapshot_notice(snapshot: &Snapshot) -> Option<Line<'static>> {
    match snapshot {
        Snapshot::Unreachable(_) | Snapshot::Inconsistent(_) => Some(
            Line::from(snapshot.to_string()).style(Style::default().fg(Color::Red)),
        ),
        Snapshot::Loading | Snapshot::Ready(_) => None,
    }
}

fn draw_entrant_view(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines: Vec<Line> = Vec::new();
    match &snap.account {
        Some((_, identity)) => {
            lines.push(Line::from(format!("Your Account: {}", identity_hex(identity))))
        }
        None => lines.push(Line::from("Not connected")),
    }

    if let Some(notice) = snapshot_notice(&snap.snapshot) {
        lines.push(Line::from(""));
        lines.push(notice);
    } else {
        let view = snap.snapshot.view();
        let manager = view
            .and_then(|v| v.manager().known().map(identity_hex))
            .unwrap_or_else(|| "Loading...".to_string());
        let status = match view.map(|v| v.is_complete()) {
            Some(Field::Known(true)) => "Closed",
            Some(Field::Known(false)) => "Open",
            _ => "Unknown",
        };
        let claimed = match view.map(|v| v.claimed()) {
            Some(Field::Known(true)) => "Yes",
            Some(Field::Known(false)) => "No",
            _ => "Unknown",
        };
        lines.push(Line::from(format!("Manager: {manager}")));
        lines.push(Line::from(format!("Status: {status}")));
        lines.push(Line::from(format!("Prize Claimed: {claimed}")));
        lines.push(Line::from(""));
    }

    let stake = format_amount(snap.stake, BASE_ASSET_DECIMALS);
    let highlight = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    match snap.ui_state {
        LotteryState::OpenEntrant => lines.push(
            Line::from(format!("[Enter] Enter Lottery ({stake} ETH)")).style(highlight),
        ),
        LotteryState::ClosedWinner => {
            lines.push(
                Line::from("Congratulations, you are the winner!")
                    .style(Style::default().fg(Color::Green)),
            );
            lines.push(Line::from("[Enter] Claim Prize").style(highlight));
        }
        LotteryState::ClosedWinnerClaimed => {
            lines.push(
                Line::from("Congratulations, you are the winner!")
                    .style(Style::default().fg(Color::Green)),
            );
            lines.push(Line::from("Prize claimed."));
        }
        LotteryState::ClosedNonWinner => {
            lines.push(Line::from("Sorry, you are not the winner."))
        }
        LotteryState::Disconnected => {
            lines.push(Line::from("Connect a wallet to take part."))
        }
        _ => lines.push(Line::from("Synchronizing with the ledger...")),
    }

    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Home"));
    f.render_widget(widget, area);
}

fn draw_owner_view(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines: Vec<Line> = Vec::new();
    if let Some(notice) = snapshot_notice(&snap.snapshot) {
        lines.push(notice);
    } else if let Some(view) = snap.snapshot.view()
        && view.is_complete() == Field::Known(true)
    {
        let winner = match view.winner() {
            Field::Known(Some(winner)) => identity_hex(&winner),
            _ => "Loading...".to_string(),
        };
        lines.push(Line::from(format!("Lottery Winner is: {winner}")));
        lines.push(Line::from(""));
    }

    let highlight = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    match snap.ui_state {
        LotteryState::OwnerCanPick => {
            lines.push(Line::from("[Enter] Pick Winner").style(highlight))
        }
        LotteryState::NotOwner => lines.push(
            Line::from("You are not the owner").style(Style::default().fg(Color::Red)),
        ),
        LotteryState::OwnerWaiting => lines.push(Line::from("The round is closed.")),
        LotteryState::Disconnected => lines.push(Line::from("Not connected")),
        _ => lines.push(Line::from("Checking ownership...")),
    }

    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Pick Winner"));
    f.render_widget(widget, area);
}

fn draw_status(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines: Vec<Line> = Vec::new();
    if !snap.phase.is_idle() {
        lines.push(Line::from(snap.phase.to_string()).style(Style::default().fg(Color::Cyan)));
    }
    let widget = if snap.errors.is_empty() {
        if snap.status.trim().is_empty() {
            lines.push(Line::from("Ready"));
        } else {
            for line in snap.status.lines() {
                lines.push(Line::from(line.to_string()));
            }
        }
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .style(Style::default().fg(Color::Green))
    } else {
        // newest first so the latest failure stays visible in a short panel
        for e in snap.errors.iter().rev() {
            lines.push(Line::from(e.clone()));
        }
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Errors"))
            .style(Style::default().fg(Color::Red))
    };
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect) {
    let help = Paragraph::new(
        "Enter act | Tab switch view | a next account | r refresh | q/Esc quit",
    )
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_modals(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    match &state.mode {
        Mode::Signing(prompt) => {
            let area = centered_rect(60, 30, f.area());
            let block = Block::default().borders(Borders::ALL).title("Signature Request");
            let request = &prompt.request;
            let mut lines = vec![
                Line::from(format!("Action: {}", request.kind)),
                Line::from(format!("Contract: {}", short_contract(&request.contract_id))),
            ];
            if request.amount > 0 {
                lines.push(Line::from(format!(
                    "Amount: {} ETH",
                    format_amount(request.amount, BASE_ASSET_DECIMALS)
                )));
            }
            let signer = short_identity(&request.signer);
            match &snap.account {
                Some((name, active)) if *active == request.signer => {
                    lines.push(Line::from(format!("Signer: {name} ({signer})")));
                }
                _ => lines.push(Line::from(format!("Signer: {signer}"))),
            }
            lines.push(Line::from(""));
            lines.push(Line::from("Sign this transaction? (Y/N)"));
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(Paragraph::new(lines), block.inner(area));
        }
        Mode::QuitModal => {
            let area = centered_rect(40, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Confirm Quit");
            let p = Paragraph::new("Quit the lottery client? (Y/N)");
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::Normal => {}
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1]);

    vertical[1]
}

fn short_contract(contract_id: &fuels::prelude::ContractId) -> String {
    let full = format!("0x{}", hex::encode(contract_id.as_slice()));
    if full.len() <= 14 {
        return full;
    }
    format!("{}…{}", &full[..8], &full[full.len() - 4..])
}

fn format_amount(amount: u64, decimal_places: u32) -> String {
    let one_unit = 10u64.saturating_pow(decimal_places);
    let whole = amount / one_unit;
    let fractional = amount % one_unit;
    if fractional == 0 {
        format!("{}", whole)
    } else {
        let digits = format!("{:0width$}", fractional, width = decimal_places as usize);
        format!("{}.{}", whole, digits.trim_end_matches('0'))
    }
}

/// Declines a signing prompt that cannot be shown.
pub fn decline_unshown(prompt: SigningPrompt) {
    warn!(kind = %prompt.request.kind, "signing prompt arrived while another is open; declining");
    prompt.respond(false);
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        contract::{
            SigningAgent,
            SigningRequest,
        },
        gateway::PromptAgent,
        testing::identity,
        view::{
            FieldReads,
            LotteryView,
        },
    };
    use crossterm::event::{
        KeyEvent,
        KeyModifiers,
    };
    use fuels::prelude::ContractId;
    use ratatui::backend::TestBackend;

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn closed_snapshot(winner: u8, claimed: bool) -> Snapshot {
        Snapshot::Ready(
            LotteryView::assemble(
                FieldReads {
                    manager: Field::Known(identity(0xA)),
                    is_complete: Field::Known(true),
                    claimed: Field::Known(claimed),
                    block_height: Some(12),
                    ..Default::default()
                }
                .with_winner_identity(Field::Known(identity(winner))),
            )
            .unwrap(),
        )
    }

    fn app_snapshot(role: Role, ui_state: LotteryState, snapshot: Snapshot) -> AppSnapshot {
        AppSnapshot {
            role,
            account: Some(("alice".to_string(), identity(0xB))),
            network: "Local".to_string(),
            contract_id: ContractId::zeroed(),
            stake: 100_000_000,
            snapshot,
            ui_state,
            phase: TxPhase::Idle,
            status: String::new(),
            errors: Vec::new(),
        }
    }

    fn render(state: &UiState, snap: &AppSnapshot) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| ui(f, state, snap)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer[(x, y)].symbol());
            }
            text.push('\n');
        }
        text
    }

    #[test]
    fn format_amount__renders_fractional_base_units() {
        assert_eq!(format_amount(100_000_000, 9), "0.1");
        assert_eq!(format_amount(2_000_000_000, 9), "2");
        assert_eq!(format_amount(1_500_000_001, 9), "1.500000001");
    }

    #[test]
    fn interpret_event__quit_needs_confirmation() {
        // given
        let mut state = UiState::default();

        // when
        let first = interpret_event(&mut state, key(KeyCode::Char('q')));
        let second = interpret_event(&mut state, key(KeyCode::Char('y')));

        // then
        assert_eq!(first, Some(UserEvent::Redraw));
        assert_eq!(second, Some(UserEvent::Quit));
    }

    #[tokio::test]
    async fn interpret_event__signing_modal_answers_the_prompt() {
        // given
        let (agent, mut prompts) = PromptAgent::channel();
        let answer = tokio::spawn(async move {
            agent
                .authorize(SigningRequest {
                    kind: TxKind::Enter,
                    contract_id: ContractId::zeroed(),
                    amount: 100_000_000,
                    signer: identity(0xB),
                })
                .await
        });
        let mut state = UiState::default();
        state.open_signing(prompts.recv().await.unwrap()).unwrap();

        // when
        let ignored = interpret_event(&mut state, key(KeyCode::Enter));
        let event = interpret_event(&mut state, key(KeyCode::Char('y')));

        // then
        assert_eq!(ignored, None);
        assert_eq!(
            event,
            Some(UserEvent::Signed {
                kind: TxKind::Enter,
                approved: true
            })
        );
        assert!(!state.is_signing());
        assert!(answer.await.unwrap());
    }

    #[tokio::test]
    async fn draw__signing_modal_names_the_signing_account() {
        // given
        let (agent, mut prompts) = PromptAgent::channel();
        let _pending = tokio::spawn(async move {
            agent
                .authorize(SigningRequest {
                    kind: TxKind::ClaimPrize,
                    contract_id: ContractId::zeroed(),
                    amount: 0,
                    signer: identity(0xC),
                })
                .await
        });
        let mut state = UiState::default();
        state.open_signing(prompts.recv().await.unwrap()).unwrap();
        let snap = app_snapshot(
            Role::Entrant,
            LotteryState::ClosedWinner,
            closed_snapshot(0xC, false),
        );

        // when
        let text = render(&state, &snap);

        // then
        assert!(text.contains("Signature Request"));
        assert!(text.contains(&format!("Signer: {}", short_identity(&identity(0xC)))));
        assert!(!text.contains("Signer: alice"));
    }

    #[test]
    fn draw__entrant_view_shows_loser_message() {
        // given
        let snap = app_snapshot(
            Role::Entrant,
            LotteryState::ClosedNonWinner,
            closed_snapshot(0xC, false),
        );

        // when
        let text = render(&UiState::default(), &snap);

        // then
        assert!(text.contains("Status: Closed"));
        assert!(text.contains("Prize Claimed: No"));
        assert!(text.contains("Sorry, you are not the winner."));
        assert!(!text.contains("Enter Lottery"));
    }

    #[test]
    fn draw__owner_view_shows_winner_once_closed() {
        // given
        let snap = app_snapshot(
            Role::Owner,
            LotteryState::OwnerWaiting,
            closed_snapshot(0xC, true),
        );

        // when
        let text = render(&UiState::default(), &snap);

        // then
        assert!(text.contains(&format!("Lottery Winner is: 0x{}", "0c".repeat(32))));
        assert!(text.contains("The round is closed."));
        assert!(!text.contains("[Enter] Pick Winner"));
    }

    #[test]
    fn draw__unreachable_ledger_blocks_the_view() {
        // given
        let snap = app_snapshot(
            Role::Entrant,
            LotteryState::Syncing,
            Snapshot::Unreachable("connection refused".to_string()),
        );

        // when
        let text = render(&UiState::default(), &snap);

        // then
        assert!(text.contains("Ledger unreachable: connection refused"));
        assert!(!text.contains("Manager:"));
    }
}
