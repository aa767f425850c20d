// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Turns a JSON source into the documents of the inverted index, following the mapping and
//! creating mappers for the fields it does not know yet.

mod context;
mod dynamic;
mod dynamic_update;

use std::sync::Arc;

use mapwright_config::IndexSettings;
use serde_json::Value as JsonValue;

use self::context::{ParseContext, ParseLimits};
use self::dynamic::{
    create_dynamic_field, create_dynamic_object, dynamic_policy, object_template_mapper,
    DynamicField,
};
pub(crate) use self::dynamic_update::create_dynamic_update;
use crate::document::{SharedLong, UNASSIGNED_SEQ_NO, UNSET_VERSION};
use crate::field_type::{is_coordinate_array, MetadataKind};
use crate::lookup::MappingLookup;
use crate::mapper::{
    child_path, Dynamic, FieldMapper, Mapper, MappingParserContext, MetadataContext,
    MetadataFieldMapper, ObjectMapper,
};
use crate::token_stream::{
    parse_json_source, split_and_validate_path, DotExpandingTokenStream, ExpansionScope,
    JsonTokenStream, Token, TokenLocation, TokenStream,
};
use crate::{DocParsingError, ParsedDocument, SourceToParse};

type Stream<'a> = DotExpandingTokenStream<JsonTokenStream<'a>>;

type MetadataHook = fn(&MetadataFieldMapper, &mut MetadataContext) -> Result<(), DocParsingError>;

/// Parses source documents against a [`MappingLookup`]. It holds no per-document state and is
/// shared by all the parses of an index.
#[derive(Clone, Debug)]
pub struct DocumentParser {
    mapping_ctx: MappingParserContext,
    limits: ParseLimits,
}

impl Default for DocumentParser {
    fn default() -> Self {
        DocumentParser::new(&IndexSettings::default(), MappingParserContext::default())
    }
}

impl DocumentParser {
    pub fn new(settings: &IndexSettings, mapping_ctx: MappingParserContext) -> DocumentParser {
        DocumentParser {
            mapping_ctx,
            limits: ParseLimits {
                depth: settings.depth_limit(),
                nested_objects: settings.nested_objects_limit(),
            },
        }
    }

    /// Parses one document. The lookup is the mapping snapshot in effect for the whole parse.
    /// New fields are not added to it: they are returned as [`ParsedDocument::dynamic_update`].
    pub fn parse(
        &self,
        lookup: &MappingLookup,
        source: SourceToParse,
    ) -> Result<ParsedDocument, DocParsingError> {
        let document = parse_json_source(&source.source).map_err(|error| {
            DocParsingError::parse(
                TokenLocation::default(),
                format!("failed to parse the document: {error}"),
            )
        })?;
        if !document.is_object() {
            return Err(DocParsingError::parse(
                TokenLocation::default(),
                "Malformed content, must start with an object",
            ));
        }
        let mut ctx = ParseContext::new(lookup, &self.mapping_ctx, self.limits);
        let seq_no = SharedLong::new(UNASSIGNED_SEQ_NO);
        let version = SharedLong::new(UNSET_VERSION);
        let mut stored_source = None;
        let metadata = (&source, &document, &seq_no, &version);
        let pre_parse: MetadataHook = MetadataFieldMapper::pre_parse;
        run_metadata_hooks(&mut ctx, metadata, &mut stored_source, pre_parse)?;

        let mut stream = DotExpandingTokenStream::new(JsonTokenStream::new(&document));
        stream.next_token()?;
        let root = lookup.root_mapper().clone();
        match root.as_ref() {
            Mapper::Object(root_object) if root_object.is_enabled() => {
                stream.push_scope(root_object.expansion_scope());
                parse_object_content(&mut ctx, &mut stream, root_object, "")?;
                stream.pop_scope();
            }
            _ => stream.skip_children()?,
        }
        if let Some(token) = stream.next_token()? {
            return Err(DocParsingError::Internal(format!(
                "unconsumed token [{token}] after the end of the document"
            )));
        }
        for field in lookup.index_time_script_fields() {
            field.index_script_values(&document, &mut ctx.leaf_context())?;
        }
        let post_parse: MetadataHook = MetadataFieldMapper::post_parse;
        run_metadata_hooks(&mut ctx, metadata, &mut stored_source, post_parse)?;

        let output = ctx.into_parts();
        let dynamic_update = create_dynamic_update(
            lookup,
            &output.dynamic_mappers,
            output.dynamic_runtime_fields,
            &self.mapping_ctx,
        )?;
        Ok(ParsedDocument {
            id: source.id,
            routing: source.routing,
            docs: output.docs,
            source: stored_source,
            dynamic_update,
            ignored_fields: output.ignored_fields.into_iter().collect(),
            seq_no,
            version,
        })
    }
}

fn run_metadata_hooks(
    ctx: &mut ParseContext,
    (source, document, seq_no, version): (&SourceToParse, &JsonValue, &SharedLong, &SharedLong),
    stored_source: &mut Option<JsonValue>,
    hook: MetadataHook,
) -> Result<(), DocParsingError> {
    let lookup = ctx.lookup;
    let mut metadata_ctx = MetadataContext {
        id: source.id.as_deref(),
        routing: source.routing.as_deref(),
        source: document,
        stored_source: stored_source.take(),
        docs: &mut ctx.docs,
        ignored_fields: &ctx.ignored_fields,
        seq_no,
        version,
    };
    for metadata_mapper in lookup.metadata_mappers() {
        hook(metadata_mapper, &mut metadata_ctx)?;
    }
    *stored_source = metadata_ctx.stored_source;
    Ok(())
}

/// Where a field name leads.
enum Resolved {
    Mapper(Arc<Mapper>),
    /// A runtime field of the same name shadows the value. Nothing is indexed.
    RuntimeField,
    Unmapped,
}

fn resolve(
    ctx: &ParseContext,
    stream: &Stream,
    parent: &ObjectMapper,
    name: &str,
    is_leaf: bool,
) -> Result<Resolved, DocParsingError> {
    if parent.name().is_empty() && MetadataKind::from_name(name).is_some() {
        return Err(DocParsingError::parse(
            stream.location(),
            format!(
                "Field [{name}] is a metadata field and cannot be added inside a document. Use \
                 the index API request parameters."
            ),
        ));
    }
    if let Some(mapper) = parent.child_arc(name) {
        return Ok(Resolved::Mapper(mapper.clone()));
    }
    let full_path = child_path(parent.name(), name);
    if let Some(mapper) = ctx.dynamic_mapper(&full_path) {
        return Ok(Resolved::Mapper(mapper.clone()));
    }
    if is_leaf
        && (ctx.root().runtime_field(&full_path).is_some()
            || ctx.has_dynamic_runtime_field(&full_path))
    {
        return Ok(Resolved::RuntimeField);
    }
    Ok(Resolved::Unmapped)
}

fn strict_error(parent: &ObjectMapper, name: &str) -> DocParsingError {
    let path = if parent.name().is_empty() {
        crate::mapping::DOC_TYPE
    } else {
        parent.name()
    };
    DocParsingError::StrictDynamicMapping {
        path: path.to_string(),
        field: name.to_string(),
    }
}

fn alias_error(stream: &Stream, name: &str) -> DocParsingError {
    DocParsingError::parse(
        stream.location(),
        format!("Cannot write to a field alias [{name}]."),
    )
}

/// Reads the content of an object up to its end token. `prefix` is prepended to the field
/// names, it is not empty while an object is flattened into a parent without sub-objects.
fn parse_object_content(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    object: &ObjectMapper,
    prefix: &str,
) -> Result<(), DocParsingError> {
    loop {
        match stream.next_token()? {
            Some(Token::EndObject) => return Ok(()),
            Some(Token::FieldName) => {}
            Some(token) => {
                return Err(DocParsingError::parse(
                    stream.location(),
                    format!("unexpected token [{token}] in object [{}]", object.name()),
                ))
            }
            None => {
                return Err(DocParsingError::parse(
                    stream.location(),
                    format!("object mapping [{}] is missing its end", object.name()),
                ))
            }
        }
        let name = stream.current_name().unwrap_or_default().to_string();
        if name.trim().is_empty() {
            split_and_validate_path(&name)
                .map_err(|error| error.with_location(stream.location()))?;
            return Err(DocParsingError::parse(
                stream.location(),
                format!("Field name cannot contain only whitespace: [{prefix}{name}]"),
            ));
        }
        let name = format!("{prefix}{name}");
        let Some(token) = stream.next_token()? else {
            return Err(DocParsingError::parse(
                stream.location(),
                format!(
                    "object mapping for [{}] tried to parse field [{name}] as object, but got \
                     EOF, has a concrete value been provided to it?",
                    object.name()
                ),
            ));
        };
        match token {
            Token::StartObject => parse_object(ctx, stream, object, &name)?,
            Token::StartArray => parse_array(ctx, stream, object, &name)?,
            token if token.is_value() => parse_value(ctx, stream, object, &name)?,
            token => {
                return Err(DocParsingError::parse(
                    stream.location(),
                    format!("unexpected token [{token}] as the value of [{name}]"),
                ))
            }
        }
    }
}

fn parse_object(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    parent: &ObjectMapper,
    name: &str,
) -> Result<(), DocParsingError> {
    match resolve(ctx, stream, parent, name, false)? {
        Resolved::Mapper(mapper) => parse_object_or_field(ctx, stream, &mapper),
        _ if !parent.subobjects() => parse_flat_object(ctx, stream, parent, name),
        _ => parse_dynamic_object(ctx, stream, parent, name),
    }
}

/// Parses an object value with the mapper of its field.
fn parse_object_or_field(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    mapper: &Mapper,
) -> Result<(), DocParsingError> {
    match mapper {
        Mapper::Object(object) => parse_object_or_nested(ctx, stream, object),
        Mapper::Field(field) => {
            let value = stream.read_subtree()?;
            index_field(ctx, stream, field, &value)
        }
        Mapper::Alias(alias) => Err(alias_error(stream, alias.name())),
        Mapper::Metadata(metadata_mapper) => Err(DocParsingError::Internal(format!(
            "metadata field [{}] found in the mapping tree",
            metadata_mapper.name()
        ))),
    }
}

fn parse_object_or_nested(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    object: &ObjectMapper,
) -> Result<(), DocParsingError> {
    if !object.is_enabled() {
        return stream.skip_children();
    }
    ctx.enter_object()?;
    let nested = object.nested_settings();
    let parent_doc = match nested {
        Some(_) => Some(ctx.open_nested_doc(object.name())?),
        None => None,
    };
    stream.push_scope(object.expansion_scope());
    let result = parse_object_content(ctx, stream, object, "");
    stream.pop_scope();
    result?;
    if let (Some(nested), Some(parent_doc)) = (nested, parent_doc) {
        ctx.close_nested_doc(parent_doc, nested);
    }
    ctx.exit_object();
    Ok(())
}

/// An unmapped object value under an object without sub-objects: its leaves become dotted
/// children of that object.
fn parse_flat_object(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    parent: &ObjectMapper,
    name: &str,
) -> Result<(), DocParsingError> {
    if matches!(dynamic_policy(ctx, parent), Dynamic::True | Dynamic::Runtime) {
        if let Some(mapper) = object_template_mapper(ctx, parent, name)? {
            match mapper.as_ref() {
                Mapper::Object(object) if object.is_nested() => {
                    return Err(DocParsingError::parse(
                        stream.location(),
                        format!(
                            "Tried to add nested object [{name}] to object [{}] which does not \
                             support subobjects",
                            parent.name()
                        ),
                    ));
                }
                Mapper::Object(_) => {}
                _ => {
                    ctx.add_dynamic_mapper(mapper.clone());
                    return parse_object_or_field(ctx, stream, &mapper);
                }
            }
        }
    }
    ctx.enter_object()?;
    stream.push_scope(ExpansionScope {
        flat: true,
        flat_paths: Vec::new(),
    });
    let result = parse_object_content(ctx, stream, parent, &format!("{name}."));
    stream.pop_scope();
    result?;
    ctx.exit_object();
    Ok(())
}

fn parse_dynamic_object(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    parent: &ObjectMapper,
    name: &str,
) -> Result<(), DocParsingError> {
    match dynamic_policy(ctx, parent) {
        Dynamic::Strict => Err(strict_error(parent, name)),
        Dynamic::False => stream.skip_children(),
        Dynamic::True | Dynamic::Runtime => {
            let mapper = create_dynamic_object(ctx, parent, name)?;
            ctx.add_dynamic_mapper(mapper.clone());
            parse_object_or_field(ctx, stream, &mapper)
        }
    }
}

fn parse_array(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    parent: &ObjectMapper,
    name: &str,
) -> Result<(), DocParsingError> {
    match resolve(ctx, stream, parent, name, true)? {
        Resolved::RuntimeField => stream.skip_children(),
        Resolved::Mapper(mapper) => match mapper.as_ref() {
            Mapper::Field(field) if field.parses_arrays_natively() => {
                let value = stream.read_subtree()?;
                index_native_array(ctx, stream, field, &value)
            }
            _ => parse_array_elements(ctx, stream, parent, name),
        },
        Resolved::Unmapped => match dynamic_policy(ctx, parent) {
            Dynamic::Strict => Err(strict_error(parent, name)),
            Dynamic::False => stream.skip_children(),
            Dynamic::True | Dynamic::Runtime => {
                // A template may map the array as a whole, `geo_point` coordinates for instance.
                if let Some(mapper) = object_template_mapper(ctx, parent, name)? {
                    if let Mapper::Field(field) = mapper.as_ref() {
                        if field.parses_arrays_natively() {
                            ctx.add_dynamic_mapper(mapper.clone());
                            let value = stream.read_subtree()?;
                            return index_native_array(ctx, stream, field, &value);
                        }
                    }
                }
                parse_array_elements(ctx, stream, parent, name)
            }
        },
    }
}

/// Parses every element of an array as a value of `name`. Nested arrays are flattened.
fn parse_array_elements(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    parent: &ObjectMapper,
    name: &str,
) -> Result<(), DocParsingError> {
    loop {
        match stream.next_token()? {
            Some(Token::EndArray) => return Ok(()),
            Some(Token::StartObject) => parse_object(ctx, stream, parent, name)?,
            Some(Token::StartArray) => parse_array(ctx, stream, parent, name)?,
            Some(token) if token.is_value() => parse_value(ctx, stream, parent, name)?,
            Some(token) => {
                return Err(DocParsingError::parse(
                    stream.location(),
                    format!("unexpected token [{token}] in the array of [{name}]"),
                ))
            }
            None => {
                return Err(DocParsingError::parse(
                    stream.location(),
                    format!(
                        "object mapping for [{}] with array for [{name}] tried to parse as \
                         array, but got EOF, is there a mismatch in types for the same field?",
                        parent.name()
                    ),
                ))
            }
        }
    }
}

fn index_native_array(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    field: &FieldMapper,
    value: &JsonValue,
) -> Result<(), DocParsingError> {
    match value {
        JsonValue::Array(elements) if !is_coordinate_array(value) => {
            for element in elements {
                index_field(ctx, stream, field, element)?;
            }
            Ok(())
        }
        _ => index_field(ctx, stream, field, value),
    }
}

/// Parses a scalar or `null` value.
fn parse_value(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    parent: &ObjectMapper,
    name: &str,
) -> Result<(), DocParsingError> {
    let Some(value) = stream.scalar_value().cloned() else {
        return Err(DocParsingError::Internal(format!(
            "value token of [{name}] without a value"
        )));
    };
    match resolve(ctx, stream, parent, name, true)? {
        Resolved::RuntimeField => Ok(()),
        Resolved::Mapper(mapper) => index_mapper_value(ctx, stream, &mapper, name, &value),
        Resolved::Unmapped => parse_dynamic_value(ctx, stream, parent, name, &value),
    }
}

fn index_mapper_value(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    mapper: &Mapper,
    name: &str,
    value: &JsonValue,
) -> Result<(), DocParsingError> {
    match mapper {
        Mapper::Field(field) => index_field(ctx, stream, field, value),
        Mapper::Object(object) if !object.is_enabled() || value.is_null() => Ok(()),
        Mapper::Object(object) => Err(DocParsingError::parse(
            stream.location(),
            format!(
                "object mapping for [{}] tried to parse field [{name}] as object, but found a \
                 concrete value",
                object.name()
            ),
        )),
        Mapper::Alias(alias) => Err(alias_error(stream, alias.name())),
        Mapper::Metadata(metadata_mapper) => Err(DocParsingError::Internal(format!(
            "metadata field [{}] found in the mapping tree",
            metadata_mapper.name()
        ))),
    }
}

fn parse_dynamic_value(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    parent: &ObjectMapper,
    name: &str,
    value: &JsonValue,
) -> Result<(), DocParsingError> {
    let dynamic = dynamic_policy(ctx, parent);
    match dynamic {
        Dynamic::Strict => Err(strict_error(parent, name)),
        Dynamic::False => Ok(()),
        Dynamic::True | Dynamic::Runtime => {
            match create_dynamic_field(ctx, parent, name, value, dynamic)? {
                None => Ok(()),
                Some(DynamicField::Runtime(runtime_field)) => {
                    ctx.add_dynamic_runtime_field(runtime_field);
                    Ok(())
                }
                Some(DynamicField::Concrete(mapper)) => {
                    ctx.add_dynamic_mapper(mapper.clone());
                    index_mapper_value(ctx, stream, &mapper, name, value)
                }
            }
        }
    }
}

/// Indexes a value into a leaf field of the current document, then into its `copy_to`
/// targets.
fn index_field(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    field: &FieldMapper,
    value: &JsonValue,
) -> Result<(), DocParsingError> {
    field
        .index_value(value, &mut ctx.leaf_context())
        .map_err(|error| error.with_location(stream.location()))?;
    if ctx.within_copy_to || field.copy_to().is_empty() {
        return Ok(());
    }
    ctx.within_copy_to = true;
    let result = field
        .copy_to()
        .iter()
        .try_for_each(|target| parse_copy(ctx, stream, target, value));
    ctx.within_copy_to = false;
    result
}

fn parse_copy(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    target: &str,
    value: &JsonValue,
) -> Result<(), DocParsingError> {
    let target_doc = ctx.doc_for_copy_target(target);
    let previous_doc = std::mem::replace(&mut ctx.current_doc, target_doc);
    let result = copy_value(ctx, stream, target, value);
    ctx.current_doc = previous_doc;
    result
}

fn copy_value(
    ctx: &mut ParseContext,
    stream: &mut Stream,
    target: &str,
    value: &JsonValue,
) -> Result<(), DocParsingError> {
    let existing = ctx
        .lookup
        .field_mapper_arc(target)
        .or_else(|| ctx.lookup.object_mapper_arc(target))
        .or_else(|| ctx.dynamic_mapper(target))
        .cloned();
    if let Some(mapper) = existing {
        return match mapper.as_ref() {
            Mapper::Field(field) => index_field(ctx, stream, field, value),
            Mapper::Alias(alias) => Err(DocParsingError::parse(
                stream.location(),
                format!("Cannot copy to a field alias [{}].", alias.name()),
            )),
            _ => Err(DocParsingError::parse(
                stream.location(),
                format!("Cannot copy to field [{target}] since it is mapped as an object"),
            )),
        };
    }
    if ctx.root().runtime_field(target).is_some() || ctx.has_dynamic_runtime_field(target) {
        return Ok(());
    }
    let Some((parent, leaf_name)) = copy_target_parent(ctx, stream, target)? else {
        return Ok(());
    };
    let Mapper::Object(parent) = parent.as_ref() else {
        return Err(DocParsingError::Internal(format!(
            "parent of [{target}] is not an object"
        )));
    };
    parse_dynamic_value(ctx, stream, parent, &leaf_name, value)
}

/// Walks the objects leading to a `copy_to` target, creating the missing ones. Returns the
/// parent object and the name of the target within it, `None` when a non-dynamic or disabled
/// object swallows the value.
fn copy_target_parent(
    ctx: &mut ParseContext,
    stream: &Stream,
    target: &str,
) -> Result<Option<(Arc<Mapper>, String)>, DocParsingError> {
    let parts = split_and_validate_path(target)
        .map_err(|error| error.with_location(stream.location()))?;
    let mut parent = ctx.lookup.root_mapper().clone();
    for (index, part) in parts[..parts.len() - 1].iter().enumerate() {
        let Mapper::Object(parent_object) = parent.as_ref() else {
            return Err(DocParsingError::Internal(format!(
                "parent of [{target}] is not an object"
            )));
        };
        if !parent_object.subobjects() {
            return Ok(Some((parent.clone(), parts[index..].join("."))));
        }
        let path = parts[..=index].join(".");
        let existing = parent_object
            .child_arc(part)
            .or_else(|| ctx.dynamic_mapper(&path))
            .cloned();
        let next = match existing {
            Some(mapper) => mapper,
            None => match dynamic_policy(ctx, parent_object) {
                Dynamic::Strict => return Err(strict_error(parent_object, part)),
                Dynamic::False => return Ok(None),
                Dynamic::True | Dynamic::Runtime => {
                    let mapper = match create_dynamic_object(ctx, parent_object, part)? {
                        mapper if mapper.as_object().is_some() => mapper,
                        _ => Arc::new(Mapper::Object(ObjectMapper::new(&path, part))),
                    };
                    if mapper.as_object().is_some_and(ObjectMapper::is_nested) {
                        return Err(DocParsingError::parse(
                            stream.location(),
                            format!(
                                "It is forbidden to create dynamic nested objects ([{path}]) \
                                 through `copy_to` or dots in field names"
                            ),
                        ));
                    }
                    ctx.add_dynamic_mapper(mapper.clone());
                    mapper
                }
            },
        };
        match next.as_object() {
            Some(object) if !object.is_enabled() => return Ok(None),
            Some(_) => {}
            None => {
                return Err(DocParsingError::parse(
                    stream.location(),
                    format!(
                        "Could not dynamically add mapping for field [{target}]. Existing \
                         mapping for [{path}] must be of type object but found [{}].",
                        next.type_name()
                    ),
                ))
            }
        }
        parent = next;
    }
    let leaf_name = parts.last().cloned().unwrap_or_default();
    Ok(Some((parent, leaf_name)))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value as JsonValue};

    use super::*;
    use crate::Mapping;

    fn lookup(mapping: JsonValue) -> MappingLookup {
        let mapping = Mapping::parse(&mapping, &MappingParserContext::default()).unwrap();
        MappingLookup::from_mapping(Arc::new(mapping)).unwrap()
    }

    fn parse(lookup: &MappingLookup, source: JsonValue) -> Result<ParsedDocument, DocParsingError> {
        DocumentParser::default().parse(lookup, SourceToParse::new(Some("1"), source.to_string()))
    }

    #[test]
    fn test_parse_mapped_fields() {
        let lookup = lookup(json!({
            "properties": {
                "name": {"type": "keyword"},
                "user": {"properties": {"age": {"type": "long"}}}
            }
        }));
        let parsed = parse(&lookup, json!({"name": "alice", "user": {"age": 42}})).unwrap();
        assert!(parsed.dynamic_update.is_none());
        assert_eq!(parsed.docs.len(), 1);
        assert_eq!(parsed.root_doc().terms("name"), ["alice"]);
        assert!(parsed.root_doc().has_field("user.age"));
        assert_eq!(parsed.root_doc().terms("_id"), ["1"]);
        assert_eq!(
            parsed.source,
            Some(json!({"name": "alice", "user": {"age": 42}}))
        );
    }

    #[test]
    fn test_dotted_names_are_expanded() {
        let lookup = lookup(json!({
            "properties": {"user": {"properties": {"name": {"type": "keyword"}}}}
        }));
        let parsed = parse(&lookup, json!({"user.name": "bob"})).unwrap();
        assert_eq!(parsed.root_doc().terms("user.name"), ["bob"]);
        assert!(parsed.dynamic_update.is_none());
    }

    #[test]
    fn test_dynamic_fields_produce_update() {
        let lookup = lookup(json!({}));
        let parsed = parse(&lookup, json!({"user": {"id": "abc", "age": 7}})).unwrap();
        assert_eq!(parsed.root_doc().terms("user.id"), ["abc"]);
        assert_eq!(parsed.root_doc().terms("user.id.keyword"), ["abc"]);
        assert!(parsed.root_doc().has_field("user.age"));
        let update = parsed.dynamic_update.as_ref().unwrap().to_json();
        assert_eq!(
            update["_doc"]["properties"]["user"]["properties"]["age"],
            json!({"type": "long"})
        );
        assert_eq!(
            update["_doc"]["properties"]["user"]["properties"]["id"]["type"],
            json!("text")
        );
    }

    #[test]
    fn test_strict_dynamic_mapping() {
        let lookup = lookup(json!({
            "dynamic": "strict",
            "properties": {"name": {"type": "keyword"}}
        }));
        let error = parse(&lookup, json!({"name": "a", "other": 1})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "mapping set to strict, dynamic introduction of [other] within [_doc] is not allowed"
        );
    }

    #[test]
    fn test_dynamic_false_keeps_source_only() {
        let lookup = lookup(json!({"dynamic": false}));
        let parsed = parse(&lookup, json!({"a": {"b": 1}, "c": [1, 2]})).unwrap();
        assert!(parsed.dynamic_update.is_none());
        assert!(!parsed.root_doc().has_field("c"));
        assert_eq!(parsed.source, Some(json!({"a": {"b": 1}, "c": [1, 2]})));
    }

    #[test]
    fn test_disabled_object_is_skipped() {
        let lookup = lookup(json!({
            "properties": {"session": {"type": "object", "enabled": false}}
        }));
        let parsed = parse(
            &lookup,
            json!({"session": {"anything": [1, {"x": "y"}]}, "flag": true}),
        )
        .unwrap();
        assert!(!parsed.root_doc().has_field("session.anything"));
        let update = parsed.dynamic_update.as_ref().unwrap().to_json();
        assert_eq!(update["_doc"]["properties"]["flag"], json!({"type": "boolean"}));
        assert!(update["_doc"]["properties"].get("session").is_none());
    }

    #[test]
    fn test_ignore_malformed() {
        let lookup = lookup(json!({
            "properties": {
                "count": {"type": "long", "ignore_malformed": true},
                "strict_count": {"type": "long"}
            }
        }));
        let parsed = parse(&lookup, json!({"count": "many"})).unwrap();
        assert_eq!(parsed.ignored_fields, ["count"]);
        assert_eq!(parsed.root_doc().terms("_ignored"), ["count"]);
        let error = parse(&lookup, json!({"strict_count": "many"})).unwrap_err();
        assert!(matches!(
            error,
            DocParsingError::Malformed { ref field, .. } if field == "strict_count"
        ));
    }

    #[test]
    fn test_nested_documents() {
        let lookup = lookup(json!({
            "properties": {
                "comments": {
                    "type": "nested",
                    "include_in_root": true,
                    "properties": {"author": {"type": "keyword"}}
                }
            }
        }));
        let parsed = parse(
            &lookup,
            json!({"comments": [{"author": "a"}, {"author": "b"}]}),
        )
        .unwrap();
        assert_eq!(parsed.docs.len(), 3);
        let nested_docs = parsed.nested_docs();
        assert_eq!(nested_docs[0].nested_path(), Some("comments"));
        assert_eq!(nested_docs[0].terms("comments.author"), ["a"]);
        assert_eq!(nested_docs[1].terms("comments.author"), ["b"]);
        assert_eq!(nested_docs[1].terms("_id"), ["1"]);
        assert_eq!(parsed.root_doc().terms("comments.author"), ["a", "b"]);
    }

    #[test]
    fn test_copy_to() {
        let lookup = lookup(json!({
            "properties": {
                "first": {"type": "keyword", "copy_to": ["full"]},
                "last": {"type": "keyword", "copy_to": ["full", "meta.all"]},
                "full": {"type": "keyword"}
            }
        }));
        let parsed = parse(&lookup, json!({"first": "john", "last": "doe"})).unwrap();
        assert_eq!(parsed.root_doc().terms("full"), ["john", "doe"]);
        assert_eq!(parsed.root_doc().terms("meta.all.keyword"), ["doe"]);
        let update = parsed.dynamic_update.as_ref().unwrap().to_json();
        assert_eq!(
            update["_doc"]["properties"]["meta"]["properties"]["all"]["type"],
            json!("text")
        );
    }

    #[test]
    fn test_copy_to_dynamic_object_is_rejected() {
        let lookup = lookup(json!({
            "properties": {"c": {"type": "keyword", "copy_to": ["b"]}}
        }));
        let error = parse(&lookup, json!({"b": {"x": 1}, "c": "v"})).unwrap_err();
        assert!(error
            .to_string()
            .contains("Cannot copy to field [b] since it is mapped as an object"));
    }

    #[test]
    fn test_copy_to_through_leaf_is_rejected() {
        let lookup = lookup(json!({
            "properties": {
                "a": {"type": "keyword", "copy_to": ["k.sub"]},
                "k": {"type": "keyword"}
            }
        }));
        let error = parse(&lookup, json!({"a": "v"})).unwrap_err();
        assert!(error.to_string().contains(
            "Could not dynamically add mapping for field [k.sub]. Existing mapping for [k] must \
             be of type object but found [keyword]."
        ));
    }

    #[test]
    fn test_concrete_value_for_object() {
        let lookup = lookup(json!({
            "properties": {"user": {"properties": {"id": {"type": "keyword"}}}}
        }));
        let error = parse(&lookup, json!({"user": "x"})).unwrap_err();
        assert!(error.to_string().contains(
            "object mapping for [user] tried to parse field [user] as object, but found a \
             concrete value"
        ));
        parse(&lookup, json!({"user": null})).unwrap();
    }

    #[test]
    fn test_metadata_field_in_document() {
        let lookup = lookup(json!({}));
        let error = parse(&lookup, json!({"_id": "x"})).unwrap_err();
        assert!(error
            .to_string()
            .contains("Field [_id] is a metadata field and cannot be added inside a document."));
    }

    #[test]
    fn test_runtime_field_shadows_value() {
        let lookup = lookup(json!({
            "runtime": {"day": {"type": "keyword"}}
        }));
        let parsed = parse(&lookup, json!({"day": "monday"})).unwrap();
        assert!(parsed.dynamic_update.is_none());
        assert!(!parsed.root_doc().has_field("day"));
    }

    #[test]
    fn test_dynamic_runtime_mode() {
        let lookup = lookup(json!({"dynamic": "runtime"}));
        let parsed = parse(&lookup, json!({"status": "ok", "code": 200})).unwrap();
        assert!(!parsed.root_doc().has_field("status"));
        let update = parsed.dynamic_update.as_ref().unwrap().to_json();
        assert_eq!(update["_doc"]["runtime"]["status"], json!({"type": "keyword"}));
        assert_eq!(update["_doc"]["runtime"]["code"], json!({"type": "long"}));
    }

    #[test]
    fn test_object_without_subobjects() {
        let lookup = lookup(json!({
            "properties": {"metrics": {"type": "object", "subobjects": false}}
        }));
        let parsed = parse(&lookup, json!({"metrics": {"cpu": {"user": 3}}})).unwrap();
        assert!(parsed.root_doc().has_field("metrics.cpu.user"));
        let update = parsed.dynamic_update.as_ref().unwrap().to_json();
        assert_eq!(
            update["_doc"]["properties"]["metrics"]["properties"]["cpu.user"],
            json!({"type": "long"})
        );
    }

    #[test]
    fn test_arrays_of_values_and_objects() {
        let lookup = lookup(json!({}));
        let parsed = parse(
            &lookup,
            json!({"tags": ["a", "b"], "points": [{"x": 1}, {"x": 2}]}),
        )
        .unwrap();
        assert_eq!(parsed.root_doc().terms("tags.keyword"), ["a", "b"]);
        assert_eq!(parsed.root_doc().numeric_doc_values("points.x").len(), 2);
    }

    #[test]
    fn test_depth_limit() {
        let lookup = lookup(json!({}));
        let settings: IndexSettings =
            serde_json::from_value(json!({"mapping": {"depth": {"limit": 2}}})).unwrap();
        let parser = DocumentParser::new(&settings, MappingParserContext::default());
        let source = SourceToParse::new(None, json!({"a": {"b": {"c": 1}}}).to_string());
        let error = parser.parse(&lookup, source).unwrap_err();
        assert!(matches!(error, DocParsingError::DepthLimit { limit: 2 }));
    }

    #[test]
    fn test_malformed_content() {
        let lookup = lookup(json!({}));
        let parser = DocumentParser::default();
        let error = parser
            .parse(&lookup, SourceToParse::new(None, "[1, 2]"))
            .unwrap_err();
        assert!(error
            .to_string()
            .contains("Malformed content, must start with an object"));
        let error = parser
            .parse(&lookup, SourceToParse::new(None, "{\"a\": "))
            .unwrap_err();
        assert!(error.to_string().contains("failed to parse the document"));
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let lookup = lookup(json!({}));
        let error = DocumentParser::default()
            .parse(
                &lookup,
                SourceToParse::new(Some("1"), r#"{"a": 1, "a": "x", "z": 1, "b": 2}"#),
            )
            .unwrap_err();
        assert!(error
            .to_string()
            .contains("failed to parse the document: Duplicate field 'a'"));
    }

    #[test]
    fn test_source_keeps_document_key_order() {
        let lookup = lookup(json!({}));
        let parsed = DocumentParser::default()
            .parse(
                &lookup,
                SourceToParse::new(Some("1"), r#"{"z": 1, "b": {"y": 2, "x": 3}, "a": 4}"#),
            )
            .unwrap();
        let source = parsed.source.unwrap().to_string();
        assert_eq!(source, r#"{"z":1,"b":{"y":2,"x":3},"a":4}"#);
    }

    #[test]
    fn test_index_time_script_reads_the_source() {
        let lookup = lookup(json!({
            "dynamic": false,
            "properties": {
                "price": {"type": "long", "script": "emit(params._source['raw'])"},
                "lenient": {
                    "type": "double",
                    "script": "emit(params._source['raw'])",
                    "on_script_error": "continue"
                }
            }
        }));
        let parsed = parse(&lookup, json!({"raw": [12, "7"]})).unwrap();
        assert_eq!(parsed.root_doc().numeric_doc_values("price"), [12, 7]);
        assert!(parsed.root_doc().has_field("lenient"));
        assert!(parsed.ignored_fields.is_empty());

        let error = parse(&lookup, json!({"price": 3})).unwrap_err();
        assert!(error
            .to_string()
            .contains("Cannot index data directly into a field with a [script] parameter"));
    }

    #[test]
    fn test_index_time_script_failures() {
        let lookup = lookup(json!({
            "dynamic": false,
            "properties": {
                "strict": {"type": "long", "script": "emit(params._source['raw'])"},
                "lenient": {
                    "type": "long",
                    "script": "emit(params._source['other'])",
                    "on_script_error": "continue"
                }
            }
        }));
        let error = parse(&lookup, json!({"raw": "many"})).unwrap_err();
        assert!(matches!(
            error,
            DocParsingError::Script { ref field, .. } if field == "strict"
        ));
        let parsed = parse(&lookup, json!({"raw": 1, "other": "many"})).unwrap();
        assert_eq!(parsed.root_doc().numeric_doc_values("strict"), [1]);
        assert_eq!(parsed.ignored_fields, ["lenient"]);
        assert_eq!(parsed.root_doc().terms("_ignored"), ["lenient"]);
    }
}
