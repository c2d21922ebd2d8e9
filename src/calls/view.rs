use callcore::session::UiEvent;
use callcore::timer::IDLE_DISPLAY;
use callcore::types::Role;
use serde::Serialize;

const STATUS_READY: &str = "Ready";

/// What the user sees, folded from the controller's UI events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallView {
    pub landing_visible: bool,
    pub incoming_prompt_visible: bool,
    pub call_ui_visible: bool,
    pub end_button_visible: bool,
    pub local_preview: bool,
    pub ringtone: bool,
    pub status_text: String,
    pub timer_text: String,
    #[serde(skip)]
    role: Role,
    #[serde(skip)]
    outcome: Option<String>,
}

impl CallView {
    pub fn new(role: Role) -> Self {
        Self {
            landing_visible: true,
            incoming_prompt_visible: false,
            call_ui_visible: false,
            end_button_visible: false,
            local_preview: false,
            ringtone: false,
            status_text: STATUS_READY.to_string(),
            timer_text: IDLE_DISPLAY.to_string(),
            role,
            outcome: None,
        }
    }

    pub fn apply(&mut self, event: &UiEvent) {
        match event {
            UiEvent::Dialing => {
                self.landing_visible = false;
                self.end_button_visible = true;
                self.status_text = "Calling".to_string();
            }
            UiEvent::IncomingCall => {
                self.incoming_prompt_visible = true;
                self.ringtone = true;
                self.status_text = "Incoming call".to_string();
            }
            UiEvent::PreviewStarted => {
                self.incoming_prompt_visible = false;
                self.ringtone = false;
                self.landing_visible = false;
                self.call_ui_visible = true;
                self.end_button_visible = true;
                self.local_preview = true;
                self.status_text = match self.role {
                    Role::Caller => "Waiting for answer",
                    Role::Callee => "Connecting",
                }
                .to_string();
            }
            UiEvent::CallConnected => {
                self.incoming_prompt_visible = false;
                self.ringtone = false;
                self.call_ui_visible = true;
                self.end_button_visible = true;
                self.status_text = "Connected".to_string();
            }
            UiEvent::TimerTick(text) => self.timer_text = text.clone(),
            UiEvent::Declined => self.outcome = Some("Call declined".to_string()),
            UiEvent::Failed(failure) => self.outcome = Some(failure.to_string()),
            UiEvent::Reset => {
                let status = self.outcome.take().unwrap_or_else(|| STATUS_READY.to_string());
                *self = Self::new(self.role);
                self.status_text = status;
            }
        }
    }
}
