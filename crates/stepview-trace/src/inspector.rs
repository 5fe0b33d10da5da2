//! Stack and heap inspection of a suspended target.
//!
//! [`inspect`] turns one debug event into a [`Snapshot`]. It works in two
//! phases. Phase one captures every frame's variable names and raw values.
//! Phase two walks the heap, which may invoke methods on the target (`toArray`,
//! `entrySet`, ...). Invocation resumes the target thread and can invalidate
//! frame handles, so no frame is touched once phase two has started.

use std::collections::{BTreeSet, HashSet};

use stepview_session::{
    DebugEvent, DebugSession, ObjectId, ReferenceTypeInfo, RemoteValue, ThreadId, TypeCategory,
    TypeOrigin,
};

use crate::error::InspectError;
use crate::model::{
    ExceptionArgs, FrameLine, HeapGraph, Literal, ObjectKind, ObjectRecord, Snapshot, Value,
};

const BOXED_TYPES: &[&str] = &[
    "java.lang.Boolean",
    "java.lang.Byte",
    "java.lang.Character",
    "java.lang.Short",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Float",
    "java.lang.Double",
];

const MESSAGE_FIELD: &str = "detailMessage";

/// How a live object is rendered. Decided once per object from its type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ObjectClass {
    Boxed,
    String,
    Composite(Composite),
    Opaque,
}

/// Objects that get a heap record with members.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Composite {
    Array,
    List,
    Set,
    Map,
    User,
}

impl ObjectClass {
    fn of(ty: &ReferenceTypeInfo) -> Self {
        if BOXED_TYPES.contains(&ty.name.as_str()) {
            ObjectClass::Boxed
        } else if ty.category == TypeCategory::String {
            ObjectClass::String
        } else if ty.category == TypeCategory::Array {
            ObjectClass::Composite(Composite::Array)
        } else if ty.is_subtype_of("java.util.Set") {
            ObjectClass::Composite(Composite::Set)
        } else if ty.is_subtype_of("java.util.Collection") {
            ObjectClass::Composite(Composite::List)
        } else if ty.is_subtype_of("java.util.Map") {
            ObjectClass::Composite(Composite::Map)
        } else if ty.origin == TypeOrigin::Program {
            ObjectClass::Composite(Composite::User)
        } else {
            ObjectClass::Opaque
        }
    }
}

struct CapturedFrame {
    name: String,
    line: u32,
    variables: Vec<(String, RemoteValue)>,
}

/// Build the snapshot for `event`, which must be on a suspended thread.
pub fn inspect<S>(session: &mut S, event: &DebugEvent) -> Result<Snapshot, InspectError>
where
    S: DebugSession + ?Sized,
{
    let thread = event.thread.as_ref().ok_or(InspectError::MissingThread)?.id;
    let frames = capture_frames(session, thread)?;

    let mut heap = HeapBuilder::new(thread);
    let mut stack_lines = Vec::with_capacity(frames.len());
    let mut stack_references = Vec::with_capacity(frames.len());
    for frame in frames {
        let mut locals = Vec::with_capacity(frame.variables.len());
        for (name, raw) in frame.variables {
            locals.push((name, heap.resolve(session, raw)?));
        }
        stack_lines.push(FrameLine {
            name: frame.name,
            line: frame.line,
        });
        stack_references.push(locals);
    }
    heap.drain(session)?;

    Ok(Snapshot {
        stack_lines,
        stack_references,
        heap_graph: heap.graph,
        user_classes: heap.user_classes,
    })
}

/// Outermost frame first.
fn capture_frames<S>(session: &mut S, thread: ThreadId) -> Result<Vec<CapturedFrame>, InspectError>
where
    S: DebugSession + ?Sized,
{
    let frames = session.stack_frames(thread)?;
    let mut captured = Vec::with_capacity(frames.len());
    for frame in frames.iter().rev() {
        let names = session.visible_variable_names(frame.id)?;
        let values = session.values(frame.id, &names)?;
        captured.push(CapturedFrame {
            name: frame.location.method.clone(),
            line: frame.location.line.saturating_sub(1),
            variables: names.into_iter().zip(values).collect(),
        });
    }
    Ok(captured)
}

/// Type and message of an exception object.
pub fn exception_args<S>(session: &mut S, exception: ObjectId) -> Result<ExceptionArgs, InspectError>
where
    S: DebugSession + ?Sized,
{
    let ty = session.reference_type(exception)?;
    let message = session
        .fields(exception)?
        .into_iter()
        .find(|(name, _)| name == MESSAGE_FIELD)
        .and_then(|(_, value)| value.object_id());
    let message = match message {
        Some(id) => Some(session.string_value(id)?),
        None => None,
    };
    Ok(ExceptionArgs {
        type_name: ty.name,
        message,
    })
}

/// Heap graph under construction for one snapshot.
///
/// A composite object is placed (its id reserved) the moment it is first seen
/// and filled in later by [`HeapBuilder::drain`]. Any later encounter of a
/// placed id, including from inside the object itself, is just a reference.
struct HeapBuilder {
    thread: ThreadId,
    graph: HeapGraph,
    placed: HashSet<ObjectId>,
    pending: Vec<(ObjectId, ReferenceTypeInfo, Composite)>,
    user_classes: BTreeSet<String>,
}

impl HeapBuilder {
    fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            graph: HeapGraph::default(),
            placed: HashSet::new(),
            pending: Vec::new(),
            user_classes: BTreeSet::new(),
        }
    }

    fn resolve<S>(&mut self, session: &mut S, raw: RemoteValue) -> Result<Value, InspectError>
    where
        S: DebugSession + ?Sized,
    {
        let literal = match raw {
            RemoteValue::Null => return Ok(Value::Null),
            RemoteValue::Object(id) => return self.resolve_object(session, id),
            RemoteValue::Boolean(v) => Literal::Boolean(v),
            RemoteValue::Char(v) => Literal::Char(v),
            RemoteValue::Byte(v) => Literal::Int(v.into()),
            RemoteValue::Short(v) => Literal::Int(v.into()),
            RemoteValue::Int(v) => Literal::Int(v.into()),
            RemoteValue::Long(v) => Literal::Int(v),
            RemoteValue::Float(v) => Literal::Float(v.into()),
            RemoteValue::Double(v) => Literal::Float(v),
        };
        Ok(Value::Primitive(literal))
    }

    fn resolve_object<S>(&mut self, session: &mut S, id: ObjectId) -> Result<Value, InspectError>
    where
        S: DebugSession + ?Sized,
    {
        if self.placed.contains(&id) {
            return Ok(Value::Reference(id));
        }

        let ty = session.reference_type(id)?;
        match ObjectClass::of(&ty) {
            ObjectClass::String => Ok(Value::string(&session.string_value(id)?)),
            ObjectClass::Boxed => match self.unbox(session, id)? {
                Some(value) => Ok(value),
                None => Ok(self.place_opaque(id, ty)),
            },
            ObjectClass::Opaque => Ok(self.place_opaque(id, ty)),
            ObjectClass::Composite(composite) => {
                self.placed.insert(id);
                self.pending.push((id, ty, composite));
                Ok(Value::Reference(id))
            }
        }
    }

    fn unbox<S>(&mut self, session: &mut S, id: ObjectId) -> Result<Option<Value>, InspectError>
    where
        S: DebugSession + ?Sized,
    {
        let value = session
            .fields(id)?
            .into_iter()
            .find(|(name, _)| name == "value")
            .map(|(_, value)| value);
        match value {
            None | Some(RemoteValue::Null) | Some(RemoteValue::Object(_)) => Ok(None),
            Some(raw) => self.resolve(session, raw).map(Some),
        }
    }

    fn place_opaque(&mut self, id: ObjectId, ty: ReferenceTypeInfo) -> Value {
        self.placed.insert(id);
        self.graph.insert(
            id,
            ObjectRecord {
                kind: ObjectKind::Opaque,
                language_type: ty.name,
                members: Vec::new(),
            },
        );
        Value::Reference(id)
    }

    /// Fill in every placed composite, discovering more as members resolve.
    fn drain<S>(&mut self, session: &mut S) -> Result<(), InspectError>
    where
        S: DebugSession + ?Sized,
    {
        while let Some((id, ty, composite)) = self.pending.pop() {
            let (kind, members) = match composite {
                Composite::Array => {
                    let elements = session.array_values(id)?;
                    (ObjectKind::List, self.indexed(session, elements)?)
                }
                Composite::List => {
                    let elements = self.to_array(session, id)?;
                    (ObjectKind::List, self.indexed(session, elements)?)
                }
                Composite::Set => {
                    let elements = self.to_array(session, id)?;
                    (ObjectKind::Set, self.indexed(session, elements)?)
                }
                Composite::Map => {
                    let entries = self.map_entries(session, id)?;
                    let mut members = Vec::with_capacity(entries.len());
                    for (key, value) in entries {
                        let key = self.resolve(session, key)?;
                        let value = self.resolve(session, value)?;
                        members.push((key, value));
                    }
                    (ObjectKind::Map, members)
                }
                Composite::User => {
                    self.user_classes.insert(ty.name.clone());
                    let fields = session.fields(id)?;
                    let mut members = Vec::with_capacity(fields.len());
                    for (name, raw) in fields {
                        members.push((Value::StringLiteral(name), self.resolve(session, raw)?));
                    }
                    (ObjectKind::UserObject, members)
                }
            };
            self.graph.insert(
                id,
                ObjectRecord {
                    kind,
                    language_type: ty.name,
                    members,
                },
            );
        }
        Ok(())
    }

    fn indexed<S>(
        &mut self,
        session: &mut S,
        elements: Vec<RemoteValue>,
    ) -> Result<Vec<(Value, Value)>, InspectError>
    where
        S: DebugSession + ?Sized,
    {
        let mut members = Vec::with_capacity(elements.len());
        for (index, raw) in elements.into_iter().enumerate() {
            members.push((Value::int(index as i64), self.resolve(session, raw)?));
        }
        Ok(members)
    }

    fn to_array<S>(&mut self, session: &mut S, collection: ObjectId) -> Result<Vec<RemoteValue>, InspectError>
    where
        S: DebugSession + ?Sized,
    {
        let array = self.invoke_for_object(session, collection, "toArray")?;
        Ok(session.array_values(array)?)
    }

    fn map_entries<S>(
        &mut self,
        session: &mut S,
        map: ObjectId,
    ) -> Result<Vec<(RemoteValue, RemoteValue)>, InspectError>
    where
        S: DebugSession + ?Sized,
    {
        let entry_set = self.invoke_for_object(session, map, "entrySet")?;
        let array = self.invoke_for_object(session, entry_set, "toArray")?;
        let entries = session.array_values(array)?;

        let mut pairs = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.object_id().ok_or(InspectError::NotAnObject {
                object: array,
                method: "toArray",
            })?;
            let key = session.invoke_no_arg(self.thread, entry, "getKey")?;
            let value = session.invoke_no_arg(self.thread, entry, "getValue")?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    fn invoke_for_object<S>(
        &mut self,
        session: &mut S,
        object: ObjectId,
        method: &'static str,
    ) -> Result<ObjectId, InspectError>
    where
        S: DebugSession + ?Sized,
    {
        session
            .invoke_no_arg(self.thread, object, method)?
            .object_id()
            .ok_or(InspectError::NotAnObject { object, method })
    }
}
