/// Pagination state of one feed or river stream.
///
/// ```text
/// Idle --begin_fetch--> Fetching --complete_page(false)--> Idle
///                                --complete_page(true)---> Finished
///                                --fail_fetch-----------> Idle
/// any  --reset--------> Idle (page 0)
/// ```
///
/// Fields are private so the invariants hold: `is_fetching` and
/// `is_finished` are never both set, and `current_page` only moves forward
/// until a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchState {
    is_fetching: bool,
    is_finished: bool,
    current_page: u32,
    is_online: bool,
}

impl Default for FetchState {
    fn default() -> Self {
        Self {
            is_fetching: false,
            is_finished: false,
            current_page: 0,
            is_online: true,
        }
    }
}

impl FetchState {
    pub fn is_fetching(&self) -> bool {
        self.is_fetching
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    /// Number of pages successfully merged since the last reset.
    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    /// Neither fetching nor finished: a page request may be issued.
    pub fn is_idle(&self) -> bool {
        !self.is_fetching && !self.is_finished
    }

    /// Returns false (and changes nothing) unless idle.
    pub(crate) fn begin_fetch(&mut self) -> bool {
        if !self.is_idle() {
            return false;
        }
        self.is_fetching = true;
        true
    }

    pub(crate) fn complete_page(&mut self, finished: bool) {
        debug_assert!(self.is_fetching, "complete_page without begin_fetch");
        self.is_fetching = false;
        self.current_page += 1;
        self.is_finished = finished;
    }

    pub(crate) fn fail_fetch(&mut self) {
        self.is_fetching = false;
    }

    pub(crate) fn set_online(&mut self, online: bool) {
        self.is_online = online;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
