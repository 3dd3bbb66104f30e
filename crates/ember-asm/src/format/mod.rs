//! Module binary format.
//!
//! Layout: magic, version, module name, table sizes, then the constant pool, classes,
//! properties and methods in id order. Counts, ids and integers are packed (see
//! [`codec`]). Constants only refer to constants with smaller ids, so the pool decodes in
//! one pass. Method bodies are stored assembled: the local constant table and op bytes.

pub(crate) mod codec;

use self::codec::{Decoder, Encoder};
use crate::class::{
    ClassStructure, Component, Composition, Contribution, Format, ParentRef, PropertyStructure,
    TypeParamDecl,
};
use crate::code::Code;
use crate::error::{DecodeError, EncodeError};
use crate::method::{Annotation, MethodFlags, MethodStructure};
use crate::param::{ParamKind, Parameter};
use crate::pool::{ConstId, Constant, ConstantPool, MemberKind, SignatureConstant, TypeId};
use crate::synth;
use crate::types::{Access, FormalType, Narrowing, TypeConstant, TypeInfoCache, TypeList};
use crate::{ClassId, ClassTable, MethodId, Module, PropertyId};

const MAGIC: &[u8; 4] = b"EMBR";
const VERSION_MAJOR: u32 = 0;
const VERSION_MINOR: u32 = 3;

pub fn to_bytes(module: &Module) -> Result<Vec<u8>, EncodeError> {
    let mut enc = Encoder::new();
    enc.write_bytes(MAGIC);
    enc.write_u32(VERSION_MAJOR);
    enc.write_u32(VERSION_MINOR);
    enc.write_module(module)?;
    Ok(enc.finish())
}

pub fn from_bytes(bytes: &[u8]) -> Result<Module, DecodeError> {
    let mut dec = Decoder::new(bytes);
    dec.expect_bytes(MAGIC)?;
    let major = dec.read_u32()?;
    let minor = dec.read_u32()?;
    if major != VERSION_MAJOR || minor != VERSION_MINOR {
        return Err(dec.err(format!(
            "unsupported module version {major}.{minor} (expected {VERSION_MAJOR}.{VERSION_MINOR})"
        )));
    }
    let mut module = ModuleReader::default().read_module(&mut dec)?;
    if dec.remaining() != 0 {
        return Err(dec.err("trailing bytes"));
    }
    synth::synthesize_all(&mut module).map_err(|err| dec.err(err.to_string()))?;
    Ok(module)
}

fn access_tag(access: Access) -> u8 {
    match access {
        Access::Public => 0,
        Access::Protected => 1,
        Access::Private => 2,
        Access::Struct => 3,
    }
}

fn format_tag(format: Format) -> u8 {
    match format {
        Format::Module => 0,
        Format::Package => 1,
        Format::Class => 2,
        Format::Const => 3,
        Format::Service => 4,
        Format::Enum => 5,
        Format::EnumValue => 6,
        Format::Interface => 7,
        Format::Mixin => 8,
    }
}

impl Encoder {
    fn write_module(&mut self, module: &Module) -> Result<(), EncodeError> {
        self.write_string(&module.name)?;
        let classes = &module.classes;
        self.write_len(module.pool.len())?;
        self.write_len(classes.class_count())?;
        self.write_len(classes.property_count())?;
        self.write_len(classes.method_count())?;

        for (_, constant) in module.pool.iter() {
            self.write_constant(constant)?;
        }
        for class in classes.classes() {
            self.write_class(class)?;
        }
        for (_, property) in classes.properties() {
            self.write_property(property)?;
        }
        for method in classes.methods() {
            self.write_method(method)?;
        }
        Ok(())
    }

    fn write_constant(&mut self, constant: &Constant) -> Result<(), EncodeError> {
        match constant {
            Constant::Int(v) => {
                self.write_u8(0);
                self.write_packed(*v);
            }
            Constant::Bool(v) => {
                self.write_u8(1);
                self.write_bool(*v);
            }
            Constant::Char(c) => {
                self.write_u8(2);
                self.write_u32(u32::from(*c));
            }
            Constant::String(s) => {
                self.write_u8(3);
                self.write_string(s)?;
            }
            Constant::Class(id) => {
                self.write_u8(4);
                self.write_u32(id.0);
            }
            Constant::Method(id) => {
                self.write_u8(5);
                self.write_u32(id.0);
            }
            Constant::Property(id) => {
                self.write_u8(6);
                self.write_u32(id.0);
            }
            Constant::Type(ty) => {
                self.write_u8(7);
                self.write_type(ty)?;
            }
            Constant::Signature(sig) => {
                self.write_u8(8);
                self.write_string(&sig.name)?;
                self.write_bool(sig.kind == MemberKind::Property);
                self.write_types(&sig.params)?;
                self.write_types(&sig.returns)?;
            }
            Constant::Singleton(id) => {
                self.write_u8(9);
                self.write_u32(id.0);
            }
            Constant::Array { element, items } => {
                self.write_u8(10);
                self.write_u32(element.index());
                self.write_len(items.len())?;
                for item in items {
                    self.write_u32(item.0);
                }
            }
            Constant::Unresolved(name) => {
                self.write_u8(11);
                self.write_string(name)?;
            }
        }
        Ok(())
    }

    fn write_types(&mut self, types: &[TypeId]) -> Result<(), EncodeError> {
        self.write_len(types.len())?;
        for ty in types {
            self.write_u32(ty.index());
        }
        Ok(())
    }

    fn write_type(&mut self, ty: &TypeConstant) -> Result<(), EncodeError> {
        match ty {
            TypeConstant::Terminal(class) => {
                self.write_u8(0);
                self.write_u32(class.0);
            }
            TypeConstant::Unresolved(name) => {
                self.write_u8(1);
                self.write_string(name)?;
            }
            TypeConstant::Parameterized { base, params } => {
                self.write_u8(2);
                self.write_u32(base.index());
                self.write_types(params)?;
            }
            TypeConstant::Annotated {
                annotation,
                underlying,
            } => {
                self.write_u8(3);
                self.write_u32(annotation.index());
                self.write_u32(underlying.index());
            }
            TypeConstant::Union(a, b) => {
                self.write_u8(4);
                self.write_u32(a.index());
                self.write_u32(b.index());
            }
            TypeConstant::Intersection(a, b) => {
                self.write_u8(5);
                self.write_u32(a.index());
                self.write_u32(b.index());
            }
            TypeConstant::VirtualChild { parent, name } => {
                self.write_u8(6);
                self.write_u32(parent.index());
                self.write_string(name)?;
            }
            TypeConstant::Formal(FormalType::TypeParam { class, name, index }) => {
                self.write_u8(7);
                self.write_u32(class.0);
                self.write_string(name)?;
                self.write_u32(*index);
            }
            TypeConstant::Formal(FormalType::MethodTypeParam {
                method,
                name,
                index,
            }) => {
                self.write_u8(8);
                self.write_u32(method.0);
                self.write_string(name)?;
                self.write_u32(*index);
            }
            TypeConstant::AutoNarrowing(Narrowing::This) => self.write_u8(9),
            TypeConstant::AutoNarrowing(Narrowing::Parent) => self.write_u8(10),
            TypeConstant::AutoNarrowing(Narrowing::Child(name)) => {
                self.write_u8(11);
                self.write_string(name)?;
            }
            TypeConstant::Access { underlying, access } => {
                self.write_u8(12);
                self.write_u32(underlying.index());
                self.write_u8(access_tag(*access));
            }
        }
        Ok(())
    }

    fn write_class(&mut self, class: &ClassStructure) -> Result<(), EncodeError> {
        self.write_string(&class.qualified_name)?;
        self.write_string(&class.name)?;
        self.write_u8(format_tag(class.format));
        self.write_u8(access_tag(class.access));
        let flags = (class.is_static as u8)
            | (class.is_abstract as u8) << 1
            | (class.is_synthetic as u8) << 2
            | (class.frozen as u8) << 3;
        self.write_u8(flags);
        match class.parent {
            None => self.write_u8(0),
            Some(ParentRef::Class(id)) => {
                self.write_u8(1);
                self.write_u32(id.0);
            }
            Some(ParentRef::Property(id)) => {
                self.write_u8(2);
                self.write_u32(id.0);
            }
            Some(ParentRef::Method(id)) => {
                self.write_u8(3);
                self.write_u32(id.0);
            }
        }

        self.write_len(class.type_params.len())?;
        for param in &class.type_params {
            self.write_string(&param.name)?;
            self.write_u32(param.constraint.index());
        }

        self.write_len(class.contributions.len())?;
        for contribution in &class.contributions {
            match &contribution.composition {
                Composition::Extends => self.write_u8(0),
                Composition::Implements => self.write_u8(1),
                Composition::Incorporates => self.write_u8(2),
                Composition::Delegates { property } => {
                    self.write_u8(3);
                    self.write_string(property)?;
                }
                Composition::Annotation => self.write_u8(4),
                Composition::Into => self.write_u8(5),
            }
            self.write_u32(contribution.ty.index());
            self.write_option_const(contribution.condition);
        }

        self.write_len(class.children.len())?;
        for child in &class.children {
            match child {
                Component::Class(id) => {
                    self.write_u8(0);
                    self.write_u32(id.0);
                }
                Component::Property(id) => {
                    self.write_u8(1);
                    self.write_u32(id.0);
                }
                Component::MultiMethod { name, methods } => {
                    self.write_u8(2);
                    self.write_string(name)?;
                    self.write_len(methods.len())?;
                    for method in methods {
                        self.write_u32(method.0);
                    }
                }
            }
        }

        match &class.virtual_supers {
            None => self.write_u8(0),
            Some(supers) => {
                self.write_u8(1);
                self.write_types(supers)?;
            }
        }
        Ok(())
    }

    fn write_option_const(&mut self, id: Option<ConstId>) {
        match id {
            None => self.write_u8(0),
            Some(id) => {
                self.write_u8(1);
                self.write_u32(id.0);
            }
        }
    }

    fn write_property(&mut self, property: &PropertyStructure) -> Result<(), EncodeError> {
        self.write_u32(property.class.0);
        self.write_string(&property.name)?;
        self.write_u32(property.ty.index());
        self.write_u8(access_tag(property.access));
        self.write_bool(property.readonly);
        self.write_bool(property.is_static);
        self.write_option_const(property.initial);
        Ok(())
    }

    fn write_method(&mut self, method: &MethodStructure) -> Result<(), EncodeError> {
        let Code::Assembled(code) = &method.code else {
            return Err(EncodeError::NotAssembled(method.name.clone()));
        };
        self.write_u32(method.class.0);
        self.write_string(&method.name)?;
        self.write_u8(access_tag(method.access));
        self.write_u8(method.flags.bits());

        self.write_len(method.annotations.len())?;
        for annotation in &method.annotations {
            self.write_u32(annotation.class.0);
            self.write_len(annotation.args.len())?;
            for arg in &annotation.args {
                self.write_u32(arg.0);
            }
        }

        self.write_len(method.params.len())?;
        for param in &method.params {
            self.write_string(&param.name)?;
            self.write_u32(param.ty.index());
            self.write_bool(param.kind == ParamKind::TypeParam);
            self.write_option_const(param.default);
        }
        self.write_len(method.returns.len())?;
        for ret in &method.returns {
            self.write_string(&ret.name)?;
            self.write_u32(ret.ty.index());
        }

        self.write_u32(code.param_count);
        self.write_len(code.constants.len())?;
        for constant in &code.constants {
            self.write_u32(constant.0);
        }
        self.write_blob(&code.bytes)?;
        Ok(())
    }
}

/// Table sizes read up front so every id can be range checked where it is read.
#[derive(Default)]
struct ModuleReader {
    constants: usize,
    classes: usize,
    properties: usize,
    methods: usize,
}

fn access_from(tag: u8) -> Option<Access> {
    Some(match tag {
        0 => Access::Public,
        1 => Access::Protected,
        2 => Access::Private,
        3 => Access::Struct,
        _ => return None,
    })
}

fn format_from(tag: u8) -> Option<Format> {
    Some(match tag {
        0 => Format::Module,
        1 => Format::Package,
        2 => Format::Class,
        3 => Format::Const,
        4 => Format::Service,
        5 => Format::Enum,
        6 => Format::EnumValue,
        7 => Format::Interface,
        8 => Format::Mixin,
        _ => return None,
    })
}

impl ModuleReader {
    fn read_module(mut self, dec: &mut Decoder<'_>) -> Result<Module, DecodeError> {
        let name = dec.read_string()?;
        self.constants = dec.read_len()?;
        self.classes = dec.read_len()?;
        self.properties = dec.read_len()?;
        self.methods = dec.read_len()?;

        let mut pool = ConstantPool::empty();
        for _ in 0..self.constants {
            let constant = self.read_constant(dec, &pool)?;
            pool.push_decoded(constant).map_err(|message| dec.err(message))?;
        }

        let mut classes = ClassTable::default();
        for idx in 0..self.classes {
            let class = self.read_class(dec, &pool, ClassId(idx as u32))?;
            if classes.class_id(&class.qualified_name).is_some() {
                return Err(dec.err(format!("duplicate class `{}`", class.qualified_name)));
            }
            classes.push_decoded_class(class);
        }
        for _ in 0..self.properties {
            let property = self.read_property(dec, &pool)?;
            classes.push_decoded_property(property);
        }
        for idx in 0..self.methods {
            let method = self.read_method(dec, &pool, MethodId(idx as u32))?;
            classes.push_decoded_method(method);
        }

        Ok(Module {
            name,
            pool,
            classes,
            cache: TypeInfoCache::default(),
        })
    }

    fn class_id(&self, dec: &mut Decoder<'_>) -> Result<ClassId, DecodeError> {
        let id = dec.read_u32()?;
        if id as usize >= self.classes {
            return Err(dec.err(format!("invalid class id {id}")));
        }
        Ok(ClassId(id))
    }

    fn property_id(&self, dec: &mut Decoder<'_>) -> Result<PropertyId, DecodeError> {
        let id = dec.read_u32()?;
        if id as usize >= self.properties {
            return Err(dec.err(format!("invalid property id {id}")));
        }
        Ok(PropertyId(id))
    }

    fn method_id(&self, dec: &mut Decoder<'_>) -> Result<MethodId, DecodeError> {
        let id = dec.read_u32()?;
        if id as usize >= self.methods {
            return Err(dec.err(format!("invalid method id {id}")));
        }
        Ok(MethodId(id))
    }

    /// A constant id; the pool holds every constant it may refer to.
    fn const_id(&self, dec: &mut Decoder<'_>, pool: &ConstantPool) -> Result<ConstId, DecodeError> {
        let id = dec.read_u32()?;
        if id as usize >= pool.len() {
            return Err(dec.err(format!("invalid constant id {id}")));
        }
        Ok(ConstId(id))
    }

    fn type_id(&self, dec: &mut Decoder<'_>, pool: &ConstantPool) -> Result<TypeId, DecodeError> {
        let id = self.const_id(dec, pool)?;
        pool.as_type(id)
            .ok_or_else(|| dec.err(format!("constant {} is not a type", id.0)))
    }

    fn type_list(&self, dec: &mut Decoder<'_>, pool: &ConstantPool) -> Result<TypeList, DecodeError> {
        let count = dec.read_len()?;
        (0..count).map(|_| self.type_id(dec, pool)).collect()
    }

    fn option_const(
        &self,
        dec: &mut Decoder<'_>,
        pool: &ConstantPool,
    ) -> Result<Option<ConstId>, DecodeError> {
        match dec.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.const_id(dec, pool)?)),
            other => Err(dec.err(format!("invalid option tag {other}"))),
        }
    }

    fn access(&self, dec: &mut Decoder<'_>) -> Result<Access, DecodeError> {
        let tag = dec.read_u8()?;
        access_from(tag).ok_or_else(|| dec.err(format!("invalid access tag {tag}")))
    }

    fn read_constant(
        &self,
        dec: &mut Decoder<'_>,
        pool: &ConstantPool,
    ) -> Result<Constant, DecodeError> {
        let tag = dec.read_u8()?;
        Ok(match tag {
            0 => Constant::Int(dec.read_packed()?),
            1 => Constant::Bool(dec.read_bool()?),
            2 => {
                let raw = dec.read_u32()?;
                Constant::Char(
                    char::from_u32(raw).ok_or_else(|| dec.err(format!("invalid char {raw}")))?,
                )
            }
            3 => Constant::String(dec.read_string()?),
            4 => Constant::Class(self.class_id(dec)?),
            5 => Constant::Method(self.method_id(dec)?),
            6 => Constant::Property(self.property_id(dec)?),
            7 => Constant::Type(self.read_type(dec, pool)?),
            8 => {
                let name = dec.read_string()?;
                let kind = if dec.read_bool()? {
                    MemberKind::Property
                } else {
                    MemberKind::Method
                };
                Constant::Signature(SignatureConstant {
                    name,
                    kind,
                    params: self.type_list(dec, pool)?,
                    returns: self.type_list(dec, pool)?,
                })
            }
            9 => Constant::Singleton(self.class_id(dec)?),
            10 => {
                let element = self.type_id(dec, pool)?;
                let count = dec.read_len()?;
                let items = (0..count)
                    .map(|_| self.const_id(dec, pool))
                    .collect::<Result<Vec<_>, _>>()?;
                Constant::Array { element, items }
            }
            11 => Constant::Unresolved(dec.read_string()?),
            other => return Err(dec.err(format!("invalid constant tag {other}"))),
        })
    }

    fn read_type(
        &self,
        dec: &mut Decoder<'_>,
        pool: &ConstantPool,
    ) -> Result<TypeConstant, DecodeError> {
        let tag = dec.read_u8()?;
        Ok(match tag {
            0 => TypeConstant::Terminal(self.class_id(dec)?),
            1 => TypeConstant::Unresolved(dec.read_string()?),
            2 => TypeConstant::Parameterized {
                base: self.type_id(dec, pool)?,
                params: self.type_list(dec, pool)?,
            },
            3 => TypeConstant::Annotated {
                annotation: self.type_id(dec, pool)?,
                underlying: self.type_id(dec, pool)?,
            },
            4 => TypeConstant::Union(self.type_id(dec, pool)?, self.type_id(dec, pool)?),
            5 => TypeConstant::Intersection(self.type_id(dec, pool)?, self.type_id(dec, pool)?),
            6 => TypeConstant::VirtualChild {
                parent: self.type_id(dec, pool)?,
                name: dec.read_string()?,
            },
            7 => TypeConstant::Formal(FormalType::TypeParam {
                class: self.class_id(dec)?,
                name: dec.read_string()?,
                index: dec.read_u32()?,
            }),
            8 => TypeConstant::Formal(FormalType::MethodTypeParam {
                method: self.method_id(dec)?,
                name: dec.read_string()?,
                index: dec.read_u32()?,
            }),
            9 => TypeConstant::AutoNarrowing(Narrowing::This),
            10 => TypeConstant::AutoNarrowing(Narrowing::Parent),
            11 => TypeConstant::AutoNarrowing(Narrowing::Child(dec.read_string()?)),
            12 => TypeConstant::Access {
                underlying: self.type_id(dec, pool)?,
                access: self.access(dec)?,
            },
            other => return Err(dec.err(format!("invalid type tag {other}"))),
        })
    }

    fn read_class(
        &self,
        dec: &mut Decoder<'_>,
        pool: &ConstantPool,
        id: ClassId,
    ) -> Result<ClassStructure, DecodeError> {
        let qualified_name = dec.read_string()?;
        let name = dec.read_string()?;
        let tag = dec.read_u8()?;
        let format = format_from(tag).ok_or_else(|| dec.err(format!("invalid format tag {tag}")))?;
        let access = self.access(dec)?;
        let flags = dec.read_u8()?;
        if flags > 0b1111 {
            return Err(dec.err(format!("invalid class flags {flags:#x}")));
        }
        let parent = match dec.read_u8()? {
            0 => None,
            1 => Some(ParentRef::Class(self.class_id(dec)?)),
            2 => Some(ParentRef::Property(self.property_id(dec)?)),
            3 => Some(ParentRef::Method(self.method_id(dec)?)),
            other => return Err(dec.err(format!("invalid parent tag {other}"))),
        };

        let count = dec.read_len()?;
        let mut type_params = Vec::with_capacity(count);
        for _ in 0..count {
            type_params.push(TypeParamDecl {
                name: dec.read_string()?,
                constraint: self.type_id(dec, pool)?,
            });
        }

        let count = dec.read_len()?;
        let mut contributions = Vec::with_capacity(count);
        for _ in 0..count {
            let composition = match dec.read_u8()? {
                0 => Composition::Extends,
                1 => Composition::Implements,
                2 => Composition::Incorporates,
                3 => Composition::Delegates {
                    property: dec.read_string()?,
                },
                4 => Composition::Annotation,
                5 => Composition::Into,
                other => return Err(dec.err(format!("invalid composition tag {other}"))),
            };
            contributions.push(Contribution {
                composition,
                ty: self.type_id(dec, pool)?,
                condition: self.option_const(dec, pool)?,
            });
        }

        let count = dec.read_len()?;
        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            children.push(match dec.read_u8()? {
                0 => Component::Class(self.class_id(dec)?),
                1 => Component::Property(self.property_id(dec)?),
                2 => {
                    let name = dec.read_string()?;
                    let n = dec.read_len()?;
                    let methods = (0..n)
                        .map(|_| self.method_id(dec))
                        .collect::<Result<Vec<_>, _>>()?;
                    Component::MultiMethod { name, methods }
                }
                other => return Err(dec.err(format!("invalid component tag {other}"))),
            });
        }

        let virtual_supers = match dec.read_u8()? {
            0 => None,
            1 => Some(self.type_list(dec, pool)?.into_vec()),
            other => return Err(dec.err(format!("invalid option tag {other}"))),
        };

        Ok(ClassStructure {
            id,
            name,
            qualified_name,
            format,
            access,
            is_static: flags & 1 != 0,
            is_abstract: flags & 2 != 0,
            is_synthetic: flags & 4 != 0,
            parent,
            type_params,
            contributions,
            children,
            virtual_supers,
            frozen: flags & 8 != 0,
        })
    }

    fn read_property(
        &self,
        dec: &mut Decoder<'_>,
        pool: &ConstantPool,
    ) -> Result<PropertyStructure, DecodeError> {
        Ok(PropertyStructure {
            class: self.class_id(dec)?,
            name: dec.read_string()?,
            ty: self.type_id(dec, pool)?,
            access: self.access(dec)?,
            readonly: dec.read_bool()?,
            is_static: dec.read_bool()?,
            initial: self.option_const(dec, pool)?,
        })
    }

    fn read_method(
        &self,
        dec: &mut Decoder<'_>,
        pool: &ConstantPool,
        id: MethodId,
    ) -> Result<MethodStructure, DecodeError> {
        let class = self.class_id(dec)?;
        let name = dec.read_string()?;
        let access = self.access(dec)?;
        let bits = dec.read_u8()?;
        if bits > 0b1111 {
            return Err(dec.err(format!("invalid method flags {bits:#x}")));
        }
        let flags = MethodFlags::from_bits(bits);

        let count = dec.read_len()?;
        let mut annotations = Vec::with_capacity(count);
        for _ in 0..count {
            let class = self.class_id(dec)?;
            let n = dec.read_len()?;
            let args = (0..n)
                .map(|_| self.const_id(dec, pool))
                .collect::<Result<Vec<_>, _>>()?;
            annotations.push(Annotation { class, args });
        }

        let count = dec.read_len()?;
        let mut params = Vec::with_capacity(count);
        for index in 0..count {
            let name = dec.read_string()?;
            let ty = self.type_id(dec, pool)?;
            let kind = if dec.read_bool()? {
                ParamKind::TypeParam
            } else {
                ParamKind::Value
            };
            params.push(Parameter {
                name,
                ty,
                index: index as u32,
                kind,
                default: self.option_const(dec, pool)?,
            });
        }
        crate::method::check_parameters(&name, &params).map_err(|message| dec.err(message))?;

        let count = dec.read_len()?;
        let mut returns = Vec::with_capacity(count);
        for index in 0..count {
            returns.push(Parameter {
                name: dec.read_string()?,
                ty: self.type_id(dec, pool)?,
                index: index as u32,
                kind: ParamKind::Return,
                default: None,
            });
        }

        let param_count = dec.read_u32()?;
        let count = dec.read_len()?;
        let constants = (0..count)
            .map(|_| self.const_id(dec, pool))
            .collect::<Result<Vec<_>, _>>()?;
        let bytes = dec.read_blob()?;
        let ops = Code::disassemble(&bytes, &constants).map_err(|err| DecodeError {
            message: format!("method `{name}`: {}", err.message),
            offset: err.offset,
        })?;
        let code = Code::from_decoded(ops, constants, bytes, param_count)
            .map_err(|err| dec.err(format!("method `{name}`: {}", err.message)))?;

        Ok(MethodStructure {
            id,
            class,
            name,
            access,
            flags,
            annotations,
            params,
            returns,
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Op;
    use crate::param::Argument;

    fn sample() -> Module {
        let mut module = Module::new("sample");
        let class = module
            .classes
            .add_class("app.Counter", Format::Class, None)
            .unwrap();
        module
            .classes
            .add_contribution(class, Contribution::new(Composition::Extends, TypeId::OBJECT))
            .unwrap();
        let method = MethodStructure::new(
            "twice",
            vec![Parameter::value("n", TypeId::INT)],
            vec![Parameter::ret(TypeId::INT)],
        )
        .unwrap();
        let id = module.classes.add_method(class, method).unwrap();
        let two = module.pool.int(2);
        let code = module.classes.method_mut(id).unwrap().code_mut();
        code.add(Op::Line { delta: 4 }).unwrap();
        code.add(Op::Mul {
            a: Argument::Register(crate::param::Reg(0)),
            b: Argument::Constant(two),
            dst: crate::param::Reg(0),
        })
        .unwrap();
        code.add(Op::Return1 {
            value: Argument::Register(crate::param::Reg(0)),
        })
        .unwrap();
        module
    }

    #[test]
    fn module_round_trip_is_byte_identical() {
        let mut module = sample();
        let bytes = module.to_bytes().unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        let mut decoded = Module::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.name, "sample");
        assert_eq!(decoded.classes.class_count(), module.classes.class_count());
        assert_eq!(decoded.class_id("app.Counter"), module.class_id("app.Counter"));
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = sample().to_bytes().unwrap();
        for cut in [0, 3, 10, bytes.len() / 2, bytes.len() - 1] {
            assert!(Module::from_bytes(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.push(0);
        let err = Module::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.message, "trailing bytes");
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let err = Module::from_bytes(b"NOPE\0\0").unwrap_err();
        assert_eq!(err.message, "bad magic");
    }
}
