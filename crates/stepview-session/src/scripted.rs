use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::{
    DebugEvent, DebugSession, EventKind, FrameId, FrameInfo, LaunchError, Launcher, Location,
    ObjectId, Program, ReferenceTypeInfo, RemoteValue, SessionError, SessionSignal, Terminate,
    ThreadId, ThreadInfo, TypeCategory, TypeOrigin,
};

/// Ids handed out for objects materialised by remote invocation (`toArray`,
/// `entrySet`, ...). Kept far away from scripted ids.
const SYNTHETIC_ID_BASE: ObjectId = 1 << 40;

const LIST_SUPERTYPES: &[&str] = &[
    "java.util.AbstractList",
    "java.util.AbstractCollection",
    "java.util.List",
    "java.util.Collection",
    "java.lang.Iterable",
    "java.lang.Object",
];
const SET_SUPERTYPES: &[&str] = &[
    "java.util.AbstractSet",
    "java.util.AbstractCollection",
    "java.util.Set",
    "java.util.Collection",
    "java.lang.Iterable",
    "java.lang.Object",
];
const MAP_SUPERTYPES: &[&str] = &["java.util.AbstractMap", "java.util.Map", "java.lang.Object"];
const ENTRY_TYPE: &str = "java.util.Map$Entry";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MockObject {
    #[serde(rename = "type")]
    pub type_info: ReferenceTypeInfo,
    #[serde(default)]
    pub fields: Vec<(String, RemoteValue)>,
    /// Array elements, or the contents of a list/set.
    #[serde(default)]
    pub elements: Vec<RemoteValue>,
    /// Contents of a map, in iteration order.
    #[serde(default)]
    pub entries: Vec<(RemoteValue, RemoteValue)>,
    #[serde(default)]
    pub string: Option<String>,
    /// Every remote invocation on this object fails.
    #[serde(default)]
    pub fail_invocations: bool,
}

impl MockObject {
    fn new(name: &str, category: TypeCategory, supertypes: &[&str], origin: TypeOrigin) -> Self {
        Self {
            type_info: ReferenceTypeInfo {
                name: name.to_string(),
                category,
                supertypes: supertypes.iter().map(|s| s.to_string()).collect(),
                origin,
            },
            fields: Vec::new(),
            elements: Vec::new(),
            entries: Vec::new(),
            string: None,
            fail_invocations: false,
        }
    }

    pub fn string(value: &str) -> Self {
        let mut obj = Self::new(
            "java.lang.String",
            TypeCategory::String,
            &["java.lang.CharSequence", "java.lang.Object"],
            TypeOrigin::Library,
        );
        obj.string = Some(value.to_string());
        obj
    }

    pub fn array(type_name: &str, elements: Vec<RemoteValue>) -> Self {
        let mut obj = Self::new(type_name, TypeCategory::Array, &["java.lang.Object"], TypeOrigin::Library);
        obj.elements = elements;
        obj
    }

    pub fn list(type_name: &str, elements: Vec<RemoteValue>) -> Self {
        let mut obj = Self::new(type_name, TypeCategory::Class, LIST_SUPERTYPES, TypeOrigin::Library);
        obj.elements = elements;
        obj
    }

    pub fn set(type_name: &str, elements: Vec<RemoteValue>) -> Self {
        let mut obj = Self::new(type_name, TypeCategory::Class, SET_SUPERTYPES, TypeOrigin::Library);
        obj.elements = elements;
        obj
    }

    pub fn map(type_name: &str, entries: Vec<(RemoteValue, RemoteValue)>) -> Self {
        let mut obj = Self::new(type_name, TypeCategory::Class, MAP_SUPERTYPES, TypeOrigin::Library);
        obj.entries = entries;
        obj
    }

    /// Boxed primitive such as `java.lang.Integer`, holding `value`.
    pub fn boxed(type_name: &str, value: RemoteValue) -> Self {
        let mut obj = Self::new(
            type_name,
            TypeCategory::Class,
            &["java.lang.Number", "java.lang.Object"],
            TypeOrigin::Library,
        );
        obj.fields.push(("value".to_string(), value));
        obj
    }

    /// Instance of a type declared by the traced program.
    pub fn user(type_name: &str, fields: Vec<(&str, RemoteValue)>) -> Self {
        let mut obj = Self::new(type_name, TypeCategory::Class, &["java.lang.Object"], TypeOrigin::Program);
        obj.fields = fields.into_iter().map(|(n, v)| (n.to_string(), v)).collect();
        obj
    }

    /// Library object with no special treatment (e.g. `java.util.Scanner`).
    pub fn library(type_name: &str) -> Self {
        Self::new(type_name, TypeCategory::Class, &["java.lang.Object"], TypeOrigin::Library)
    }

    pub fn with_supertypes(mut self, supertypes: &[&str]) -> Self {
        self.type_info.supertypes = supertypes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn failing_invocations(mut self) -> Self {
        self.fail_invocations = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MockFrame {
    pub method: String,
    pub line: u32,
    #[serde(default)]
    pub variables: Vec<(String, RemoteValue)>,
    /// The frame's method was compiled without a local variable table.
    #[serde(default)]
    pub absent_information: bool,
}

impl MockFrame {
    pub fn new(method: &str, line: u32) -> Self {
        Self {
            method: method.to_string(),
            line,
            variables: Vec::new(),
            absent_information: false,
        }
    }

    pub fn var(mut self, name: &str, value: RemoteValue) -> Self {
        self.variables.push((name.to_string(), value));
        self
    }

    pub fn without_debug_info(mut self) -> Self {
        self.absent_information = true;
        self
    }
}

/// An event plus the target state visible while it is suspended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptedEvent {
    #[serde(flatten)]
    pub event: DebugEvent,
    /// Stack of the event's thread, innermost first.
    #[serde(default)]
    pub frames: Vec<MockFrame>,
    /// Objects created or changed since the previous event.
    #[serde(default, deserialize_with = "object_table")]
    pub objects: BTreeMap<ObjectId, MockObject>,
}

/// Object tables keyed by id. The flattened event buffers its map, which
/// leaves JSON keys as strings, so ids are parsed here.
fn object_table<'de, D>(deserializer: D) -> Result<BTreeMap<ObjectId, MockObject>, D::Error>
where
    D: Deserializer<'de>,
{
    BTreeMap::<String, MockObject>::deserialize(deserializer)?
        .into_iter()
        .map(|(id, object)| {
            id.parse()
                .map(|id| (id, object))
                .map_err(|_| de::Error::custom(format!("invalid object id `{id}`")))
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptItem {
    Event(ScriptedEvent),
    /// Text the target writes to stdout/stderr.
    Output(String),
    /// The target blocks reading stdin until input is written.
    InputRequest,
    /// The target goes silent for good (an endless or very slow call).
    Stall,
}

/// A recorded session, loadable from JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionScript {
    /// Fail the launch as if the program did not compile.
    #[serde(default)]
    pub compile_error: Option<String>,
    /// Heap present before the first event.
    #[serde(default)]
    pub objects: BTreeMap<ObjectId, MockObject>,
    #[serde(default)]
    pub items: Vec<ScriptItem>,
}

struct Terminator(Arc<AtomicBool>);

impl Terminate for Terminator {
    fn terminate(&self) -> Result<(), SessionError> {
        self.0.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Deterministic, in-memory [`DebugSession`].
///
/// Frame handles follow JDI rules: each `stack_frames` call mints new ids, and
/// any remote invocation invalidates every frame handle minted before it.
#[derive(Debug)]
pub struct ScriptedSession {
    items: VecDeque<ScriptItem>,
    objects: HashMap<ObjectId, MockObject>,
    stacks: HashMap<ThreadId, Vec<MockFrame>>,
    live_frames: HashMap<FrameId, MockFrame>,
    next_frame_id: FrameId,
    next_synthetic_id: ObjectId,
    pending_output: String,
    blocked_on_input: bool,
    stalled: bool,
    terminated: Arc<AtomicBool>,
    written_input: Vec<String>,
    invocations: Vec<(ObjectId, String)>,
    resumes: usize,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            objects: HashMap::new(),
            stacks: HashMap::new(),
            live_frames: HashMap::new(),
            next_frame_id: 1,
            next_synthetic_id: SYNTHETIC_ID_BASE,
            pending_output: String::new(),
            blocked_on_input: false,
            stalled: false,
            terminated: Arc::new(AtomicBool::new(false)),
            written_input: Vec::new(),
            invocations: Vec::new(),
            resumes: 0,
        }
    }
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_script(script: SessionScript) -> Self {
        let mut session = Self::new();
        session.objects.extend(script.objects);
        session.items.extend(script.items);
        session
    }

    /// An event without thread or location (VM lifecycle events).
    pub fn event(kind: EventKind) -> ScriptedEvent {
        ScriptedEvent {
            event: DebugEvent {
                kind,
                thread: None,
                location: None,
            },
            frames: Vec::new(),
            objects: BTreeMap::new(),
        }
    }

    /// An event on `thread`, located at the innermost of `frames`.
    pub fn thread_event(kind: EventKind, thread: ThreadInfo, frames: Vec<MockFrame>) -> ScriptedEvent {
        let location = frames.first().map(|f| Location {
            method: f.method.clone(),
            line: f.line,
        });
        ScriptedEvent {
            event: DebugEvent {
                kind,
                thread: Some(thread),
                location,
            },
            frames,
            objects: BTreeMap::new(),
        }
    }

    pub fn push_event(&mut self, event: ScriptedEvent) {
        self.items.push_back(ScriptItem::Event(event));
    }

    pub fn push_output(&mut self, text: impl Into<String>) {
        self.items.push_back(ScriptItem::Output(text.into()));
    }

    pub fn push_input_request(&mut self) {
        self.items.push_back(ScriptItem::InputRequest);
    }

    pub fn push_stall(&mut self) {
        self.items.push_back(ScriptItem::Stall);
    }

    pub fn insert_object(&mut self, id: ObjectId, object: MockObject) {
        self.objects.insert(id, object);
    }

    pub fn written_input(&self) -> &[String] {
        &self.written_input
    }

    /// `(object, method)` for every remote invocation so far.
    pub fn invocations(&self) -> &[(ObjectId, String)] {
        &self.invocations
    }

    pub fn resume_count(&self) -> usize {
        self.resumes
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> Result<(), SessionError> {
        if self.is_terminated() {
            Err(SessionError::Terminated)
        } else {
            Ok(())
        }
    }

    fn object(&self, id: ObjectId) -> Result<&MockObject, SessionError> {
        self.objects.get(&id).ok_or(SessionError::InvalidObjectId(id))
    }

    fn frame(&self, id: FrameId) -> Result<&MockFrame, SessionError> {
        self.live_frames.get(&id).ok_or(SessionError::InvalidFrame(id))
    }

    fn materialize(&mut self, object: MockObject) -> RemoteValue {
        let id = self.next_synthetic_id;
        self.next_synthetic_id += 1;
        self.objects.insert(id, object);
        RemoteValue::Object(id)
    }

    fn deliver(&mut self, scripted: ScriptedEvent) -> DebugEvent {
        self.objects.extend(scripted.objects);
        if let Some(thread) = &scripted.event.thread {
            if !scripted.frames.is_empty() || scripted.event.kind == EventKind::ThreadDeath {
                self.stacks.insert(thread.id, scripted.frames);
            }
        }
        self.live_frames.clear();
        scripted.event
    }
}

impl DebugSession for ScriptedSession {
    fn poll(&mut self, timeout: Duration) -> Result<Option<SessionSignal>, SessionError> {
        self.check_alive()?;
        if self.blocked_on_input || self.stalled {
            std::thread::sleep(timeout);
            return Ok(None);
        }

        loop {
            match self.items.pop_front() {
                None => return Err(SessionError::Disconnected),
                Some(ScriptItem::Output(text)) => self.pending_output.push_str(&text),
                Some(ScriptItem::InputRequest) => {
                    self.blocked_on_input = true;
                    return Ok(Some(SessionSignal::InputRequested));
                }
                Some(ScriptItem::Stall) => {
                    self.stalled = true;
                    std::thread::sleep(timeout);
                    return Ok(None);
                }
                Some(ScriptItem::Event(scripted)) => {
                    return Ok(Some(SessionSignal::Event(self.deliver(scripted))));
                }
            }
        }
    }

    fn resume(&mut self) -> Result<(), SessionError> {
        self.check_alive()?;
        self.resumes += 1;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), SessionError> {
        self.check_alive()
    }

    fn stack_frames(&mut self, thread: ThreadId) -> Result<Vec<FrameInfo>, SessionError> {
        self.check_alive()?;
        let frames = self
            .stacks
            .get(&thread)
            .cloned()
            .ok_or(SessionError::InvalidThread(thread))?;
        Ok(frames
            .into_iter()
            .map(|frame| {
                let id = self.next_frame_id;
                self.next_frame_id += 1;
                let info = FrameInfo {
                    id,
                    location: Location {
                        method: frame.method.clone(),
                        line: frame.line,
                    },
                };
                self.live_frames.insert(id, frame);
                info
            })
            .collect())
    }

    fn visible_variable_names(&mut self, frame: FrameId) -> Result<Vec<String>, SessionError> {
        self.check_alive()?;
        let frame = self.frame(frame)?;
        if frame.absent_information {
            return Err(SessionError::AbsentInformation {
                method: frame.method.clone(),
            });
        }
        Ok(frame.variables.iter().map(|(name, _)| name.clone()).collect())
    }

    fn values(&mut self, frame: FrameId, names: &[String]) -> Result<Vec<RemoteValue>, SessionError> {
        self.check_alive()?;
        let frame = self.frame(frame)?;
        names
            .iter()
            .map(|name| {
                frame
                    .variables
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| SessionError::Protocol(format!("no visible variable `{name}`")))
            })
            .collect()
    }

    fn reference_type(&mut self, object: ObjectId) -> Result<ReferenceTypeInfo, SessionError> {
        self.check_alive()?;
        Ok(self.object(object)?.type_info.clone())
    }

    fn fields(&mut self, object: ObjectId) -> Result<Vec<(String, RemoteValue)>, SessionError> {
        self.check_alive()?;
        Ok(self.object(object)?.fields.clone())
    }

    fn string_value(&mut self, object: ObjectId) -> Result<String, SessionError> {
        self.check_alive()?;
        self.object(object)?
            .string
            .clone()
            .ok_or_else(|| SessionError::Protocol(format!("object {object} is not a string")))
    }

    fn array_values(&mut self, object: ObjectId) -> Result<Vec<RemoteValue>, SessionError> {
        self.check_alive()?;
        let obj = self.object(object)?;
        if obj.type_info.category != TypeCategory::Array {
            return Err(SessionError::Protocol(format!("object {object} is not an array")));
        }
        Ok(obj.elements.clone())
    }

    fn invoke_no_arg(
        &mut self,
        _thread: ThreadId,
        object: ObjectId,
        method: &str,
    ) -> Result<RemoteValue, SessionError> {
        self.check_alive()?;
        self.invocations.push((object, method.to_string()));
        // The target thread ran code; frame handles are stale now.
        self.live_frames.clear();

        let obj = self.object(object)?.clone();
        if obj.fail_invocations {
            return Err(SessionError::InvocationFailed {
                method: method.to_string(),
                message: "java.lang.IllegalStateException".to_string(),
            });
        }

        let ty = &obj.type_info;
        match method {
            "toArray" if ty.is_subtype_of("java.util.Collection") => {
                Ok(self.materialize(MockObject::array("java.lang.Object[]", obj.elements)))
            }
            "entrySet" if ty.is_subtype_of("java.util.Map") => {
                let entries = obj
                    .entries
                    .into_iter()
                    .map(|entry| {
                        let mut node = MockObject::library(&format!("{}$Node", ty.name))
                            .with_supertypes(&[ENTRY_TYPE, "java.lang.Object"]);
                        node.entries.push(entry);
                        self.materialize(node)
                    })
                    .collect();
                Ok(self.materialize(MockObject::set(&format!("{}$EntrySet", ty.name), entries)))
            }
            "getKey" | "getValue" if ty.is_subtype_of(ENTRY_TYPE) => {
                let (key, value) = obj
                    .entries
                    .into_iter()
                    .next()
                    .ok_or_else(|| SessionError::Protocol("empty map entry".to_string()))?;
                Ok(if method == "getKey" { key } else { value })
            }
            _ => Err(SessionError::InvocationFailed {
                method: method.to_string(),
                message: format!("java.lang.NoSuchMethodException: {}.{method}()", ty.name),
            }),
        }
    }

    fn write_input(&mut self, text: &str) -> Result<(), SessionError> {
        self.check_alive()?;
        self.written_input.push(text.to_string());
        self.blocked_on_input = false;
        Ok(())
    }

    fn read_output(&mut self) -> Result<String, SessionError> {
        Ok(std::mem::take(&mut self.pending_output))
    }

    fn terminate(&mut self) -> Result<(), SessionError> {
        self.terminated.store(true, Ordering::SeqCst);
        self.items.clear();
        Ok(())
    }

    fn terminator(&self) -> Arc<dyn Terminate> {
        Arc::new(Terminator(self.terminated.clone()))
    }
}

/// Launches [`ScriptedSession`]s from JSON [`SessionScript`] program sources.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplayLauncher;

impl Launcher for ReplayLauncher {
    type Session = ScriptedSession;

    fn launch(&self, program: &Program) -> Result<ScriptedSession, LaunchError> {
        if program.source.trim().is_empty() {
            return Err(LaunchError::Compile {
                diagnostics: "Unable to create class from empty file.".to_string(),
            });
        }
        let script: SessionScript = serde_json::from_str(&program.source)
            .map_err(|err| LaunchError::InvalidProgram(format!("{}: {err}", program.name)))?;
        if let Some(diagnostics) = script.compile_error {
            return Err(LaunchError::Compile { diagnostics });
        }
        tracing::debug!(
            target: "stepview.session",
            program = %program.name,
            items = script.items.len(),
            "replaying scripted session"
        );
        Ok(ScriptedSession::from_script(script))
    }
}
