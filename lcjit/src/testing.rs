//! Helpers that are only needed when testing the recorder: a scripted stand-in for the
//! interpreter and fuzzy matching of IR dumps.

use crate::{
    interp::{ExecContext, InfoKind, Pc, Word},
    ir::LitKind,
};
use fm::{FMBuilder, FMatcher};
use regex::Regex;
use std::collections::HashMap;

/// The shared update closure every [TestContext] reports.
pub(crate) const UPDATE_CLOSURE: Word = 0x7_0000;
/// The PC update frames return to.
pub(crate) const UPDATE_RETURN_PC: Pc = Pc(0x9000);

/// The state of a pretend interpreter. Tests change it between calls to
/// [crate::Recorder::advance] to mimic the effects of executing each instruction.
pub(crate) struct TestContext {
    /// Slot values relative to the current base. Unset slots read as 0.
    slots: HashMap<i32, Word>,
    pub(crate) top: u32,
    pub(crate) caller_base_distance: u32,
    /// How many words are free above the top of the stack.
    pub(crate) stack_room: u32,
    closure_infos: HashMap<Word, Word>,
    info_kinds: HashMap<Word, InfoKind>,
    literals: Vec<(Word, u8)>,
}

impl TestContext {
    pub(crate) fn new(top: u32) -> Self {
        TestContext {
            slots: HashMap::new(),
            top,
            caller_base_distance: 0,
            stack_room: 1024,
            closure_infos: HashMap::new(),
            info_kinds: HashMap::new(),
            literals: Vec::new(),
        }
    }

    pub(crate) fn set_slot(&mut self, slot: i32, w: Word) {
        self.slots.insert(slot, w);
    }

    /// Forget every slot value, e.g. after entering a new frame.
    pub(crate) fn clear_slots(&mut self) {
        self.slots.clear();
    }

    /// Declare that `info` describes objects of kind `kind`.
    pub(crate) fn info(&mut self, info: Word, kind: InfoKind) {
        self.info_kinds.insert(info, kind);
    }

    /// Declare a closure at address `closure` with info table `info`.
    pub(crate) fn closure(&mut self, closure: Word, info: Word, kind: InfoKind) {
        self.closure_infos.insert(closure, info);
        self.info(info, kind);
    }

    /// Add a literal, returning its index.
    pub(crate) fn add_literal(&mut self, w: Word, kind: LitKind) -> u16 {
        self.literals.push((w, kind as u8));
        u16::try_from(self.literals.len() - 1).unwrap()
    }

    /// Add a literal with a raw kind tag, returning its index.
    pub(crate) fn add_raw_literal(&mut self, w: Word, kind: u8) -> u16 {
        self.literals.push((w, kind));
        u16::try_from(self.literals.len() - 1).unwrap()
    }
}

impl ExecContext for TestContext {
    fn slot(&self, slot: i32) -> Word {
        self.slots.get(&slot).copied().unwrap_or(0)
    }

    fn top(&self) -> u32 {
        self.top
    }

    fn caller_base_distance(&self) -> u32 {
        self.caller_base_distance
    }

    fn stack_has_room(&self, words: u32) -> bool {
        words <= self.stack_room
    }

    fn info_of(&self, closure: Word) -> Word {
        self.closure_infos.get(&closure).copied().unwrap_or(0)
    }

    fn info_kind(&self, info: Word) -> InfoKind {
        self.info_kinds.get(&info).copied().unwrap_or(InfoKind::Other)
    }

    fn literal(&self, idx: u16) -> (Word, u8) {
        self.literals[usize::from(idx)]
    }

    fn update_closure(&self) -> Word {
        UPDATE_CLOSURE
    }

    fn update_return_pc(&self) -> Pc {
        UPDATE_RETURN_PC
    }
}

/// Build a fuzzy matcher for `ptn` where `{{name}}` binds (and must then consistently match) an
/// IR reference or other token.
fn fmatcher(ptn: &str) -> FMatcher<'_> {
    FMBuilder::new(ptn)
        .unwrap()
        .name_matcher(
            Regex::new(r"\{\{.+?\}\}").unwrap(),
            Regex::new(r"[a-zA-Z0-9\._]+").unwrap(),
        )
        .build()
        .unwrap()
}

/// Check that `text` matches the [fm] pattern `ptn`, panicking with a readable diff if not.
pub(crate) fn assert_matches(text: &str, ptn: &str) {
    if let Err(e) = fmatcher(ptn).matches(text) {
        panic!("{e}");
    }
}
