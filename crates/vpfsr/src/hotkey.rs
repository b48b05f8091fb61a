use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;

use vpfsr_core::KeySource;

/// Live keyboard state for one virtual key.
#[derive(Debug, Clone, Copy)]
pub struct AsyncKeyState {
    vk: i32,
}

impl AsyncKeyState {
    pub const fn new(vk: u16) -> Self {
        Self { vk: vk as i32 }
    }
}

impl KeySource for AsyncKeyState {
    fn is_down(&self) -> bool {
        // High bit: held right now. The low "pressed since last call" bit is
        // shared with every other caller in the process, so it is ignored.
        (unsafe { GetAsyncKeyState(self.vk) } as u16) & 0x8000 != 0
    }
}
