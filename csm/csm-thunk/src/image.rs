//! The relocatable 16-bit trampoline image and the mode-transition
//! primitive, kept in a single assembly block so the patch-slot offsets the
//! transfer code uses resolve against the image labels.
//!
//! The image is position independent until [`prepare`](crate::ThunkContext::prepare)
//! copies it below 1 MiB and rewrites the patch slots for the destination
//! address; the copy in `.text` is only ever read, never executed.
//!
//! Layout, front to back:
//!
//! 1. data slots the transfer code fills in before each switch (saved
//!    GDTR/IDTR, saved CR0/CR4, the far pointer back into long mode, the
//!    real-mode IDTR, a scratch stack);
//! 2. the attribute patch slot;
//! 3. `CsmBackFromUserCode` — real-mode code run after the callee's far
//!    return: captures the register file, handles the A20 mask, re-enters
//!    long mode;
//! 4. `CsmToUserCode` — 16-bit code run on the way in: leaves paging and
//!    protection, restores the caller-requested register file, far-returns
//!    into the callee;
//! 5. the mini-GDT (null, 16-bit code, 16-bit data, call-gate placeholder)
//!    and the GDT-register and entry-point patch slots.
//!
//! Constraints inherited from the EDK2 Thunk16 design this follows: the
//! transfer code and the firmware GDT must live below 4 GiB, and low memory
//! must be identity mapped. UEFI guarantees all three while boot services
//! are active.

use core::arch::global_asm;
use csm_registers::RegisterSet;

global_asm!(
    r#"
.section .text.csm_thunk16, "ax"
.balign 16
.code16

.global csm_rm16_start
csm_rm16_start:

# ---- state slots written by the transfer code, read CS-relative below ----

CsmSavedGdtr:
    .word 0
    .quad 0
    .word 0
CsmSavedIdtr:
    .word 0
    .quad 0
    .word 0
CsmSavedCr0:
    .long 0
CsmSavedCr4:
    .long 0
CsmSavedFar:
    .long 0
    .word 0
CsmRealIdtr:
    .word 0x3ff
    .long 0
CsmThunkAttr:
    .long 0
    .skip 16
CsmScratchTop:

# ---- real mode, immediately after the callee's far return ----
#
# Rebuilds the register save area on the callee's stack in the exact
# RegisterSet layout, optionally undoes the A20 mask, then re-enters long
# mode and hands the save-area pointer back in EAX.

CsmBackFromUserCode:
    cli
    pushw %ss
    pushw %cs
    pushl $0
    pushl $0
    pushfl
    pushw %gs
    pushw %fs
    pushw %es
    pushw %ds
    pushal
    cld
    callw CsmBase
CsmBase:
    popw %bp

    movl %cs:CsmThunkAttr-CsmBase(%bp), %eax
    testb $2, %al
    jz CsmA20CheckKbc
    movw $0x2401, %ax
    int $0x15
    jnc CsmA20Done
    jmp CsmA20Kbc
CsmA20CheckKbc:
    testb $4, %al
    jz CsmA20Done
CsmA20Kbc:
    inb $0x64, %al
    testb $2, %al
    jnz CsmA20Kbc
    movb $0xd1, %al
    outb %al, $0x64
CsmKbcWait1:
    inb $0x64, %al
    testb $2, %al
    jnz CsmKbcWait1
    movb $0xdf, %al
    outb %al, $0x60
CsmKbcWait2:
    inb $0x64, %al
    testb $2, %al
    jnz CsmKbcWait2
CsmA20Done:

    movl %cs:CsmSavedCr4-CsmBase(%bp), %eax
    movl %eax, %cr4
    movl $0xc0000080, %ecx
    rdmsr
    orl $0x100, %eax
    wrmsr
    lgdtl %cs:CsmSavedGdtr-CsmBase(%bp)
    movl %cs:CsmSavedCr0-CsmBase(%bp), %esi
    movzwl %sp, %eax
    movl %ss, %edx
    shll $4, %edx
    addl %edx, %eax
    movl %esi, %cr0
    ljmpl *%cs:CsmSavedFar-CsmBase(%bp)

# ---- 16-bit leg of the way in ----
#
# Entered from long mode through the mini-GDT's 16-bit code segment.
# Expects from the transfer code:
#   dx    real-mode segment of this buffer
#   bx    offset of CsmRealMode, alignment fixup applied
#   cx:bp callee stack (SS:SP of the save area)
#   esi   offset of the scratch stack, alignment fixup applied

CsmToUserCode:
    movw $16, %ax
    movw %ax, %ss
    movl %esi, %esp
    movl %cr0, %eax
    andl $0x7fffffff, %eax
    movl %eax, %cr0
    andb $0xfe, %al
    movl %eax, %cr0
    pushw %dx
    pushw %bx
    lretw
CsmRealMode:
    movw %cx, %ss
    movw %bp, %sp
    lidtl %cs:CsmRealIdtr-CsmScratchTop(%esi)
    popal
    popw %ds
    popw %es
    popw %fs
    popw %gs
    popfl
    addw $4, %sp
    lretl

# ---- mini-GDT: null, 16-bit code, 16-bit data, call-gate placeholder ----

.balign 16
CsmGdt:
    .quad 0
    .quad 0x008f9b000000ffff
    .quad 0x008f93000000ffff
    .quad 0
CsmGdtEnd:

CsmGdtrSlot:
    .word CsmGdtEnd - CsmGdt - 1
CsmGdtrBase:
    .quad 0
CsmEntryPoint:
    .long CsmToUserCode - csm_rm16_start
    .word 8
csm_rm16_end:

# ---- the mode-transition primitive ----
#
# csm_thunk16_transfer(regs: *mut RegisterSet, buffer: *mut u8)
#     -> *mut RegisterSet                       (System V: rdi, rsi -> rax)
#
# Copies the register set and a far-return frame onto the caller-specified
# real-mode stack, stashes long-mode state into the prepared buffer's slots,
# loads the patched GDT and far-transfers into the 16-bit entry. Returns the
# pointer to the updated register save area. R12-R15 are unreachable from
# 16-bit code and carry state across the excursion.

.code64
.balign 16
.global csm_thunk16_transfer
csm_thunk16_transfer:
    pushq %rbp
    pushq %rbx
    pushq %r12
    pushq %r13
    pushq %r14
    pushq %r15
    pushfq
    cli
    cld
    movl %es, %eax
    pushq %rax
    movl %ds, %eax
    pushq %rax
    movl %ss, %eax
    pushq %rax

    movq %rdi, %r13
    movq %rsi, %r12

    sgdt CsmSavedGdtr-csm_rm16_start(%r12)
    sidt CsmSavedIdtr-csm_rm16_start(%r12)
    movq %cr0, %rax
    movl %eax, CsmSavedCr0-csm_rm16_start(%r12)
    movq %cr4, %rax
    movl %eax, CsmSavedCr4-csm_rm16_start(%r12)
    leaq CsmLongReturn(%rip), %rax
    movl %eax, CsmSavedFar-csm_rm16_start(%r12)
    movw %cs, CsmSavedFar+4-csm_rm16_start(%r12)

    # linear top of the caller-provided real-mode stack
    movzwl 54(%r13), %eax
    shll $4, %eax
    movzwl 12(%r13), %ecx
    addl %ecx, %eax

    # far-return frame so the callee's RETF lands in CsmBackFromUserCode
    movl %r12d, %ebx
    andl $0xf, %ebx
    leal CsmBackFromUserCode-csm_rm16_start(%rbx), %ecx
    movw %cx, -4(%rax)
    movl %r12d, %edx
    shrl $4, %edx
    movw %dx, -2(%rax)

    # stage the register set in the save area below the frame
    leal -60(%rax), %ebp
    movq %r13, %rsi
    movl %ebp, %edi
    movl $56, %ecx
    rep movsb

    # working registers for the 16-bit side (see CsmToUserCode)
    movzwl 54(%r13), %ecx
    movl %ecx, %eax
    shll $4, %eax
    subl %eax, %ebp
    movl %r12d, %esi
    andl $0xf, %esi
    leal CsmRealMode-csm_rm16_start(%rsi), %ebx
    leal CsmScratchTop-csm_rm16_start(%rsi), %esi
    movl %r12d, %edx
    shrl $4, %edx

    movq %rsp, %r13
    lgdt CsmGdtrSlot-csm_rm16_start(%r12)
    movzwl CsmEntryPoint+4-csm_rm16_start(%r12), %eax
    pushq %rax
    movl CsmEntryPoint-csm_rm16_start(%r12), %eax
    pushq %rax
    lretq

CsmLongReturn:
    movl %eax, %eax
    movq %r13, %rsp
    lidt CsmSavedIdtr-csm_rm16_start(%r12)
    popq %rcx
    movw %cx, %ss
    popq %rcx
    movw %cx, %ds
    popq %rcx
    movw %cx, %es
    popfq
    popq %r15
    popq %r14
    popq %r13
    popq %r12
    popq %rbx
    popq %rbp
    retq

# ---- image metadata consumed by the preparation code ----

.section .rodata.csm_thunk16
.balign 2
.global csm_rm16_size
csm_rm16_size:
    .word csm_rm16_end - csm_rm16_start
.global csm_rm16_thunk_attr_offset
csm_rm16_thunk_attr_offset:
    .word CsmThunkAttr - csm_rm16_start
.global csm_rm16_gdt_offset
csm_rm16_gdt_offset:
    .word CsmGdt - csm_rm16_start
.global csm_rm16_gdtr_base_offset
csm_rm16_gdtr_base_offset:
    .word CsmGdtrBase - csm_rm16_start
.global csm_rm16_transition_offset
csm_rm16_transition_offset:
    .word CsmEntryPoint - csm_rm16_start
.text
"#,
    options(att_syntax)
);

unsafe extern "C" {
    static csm_rm16_start: u8;
    static csm_rm16_size: u16;
    static csm_rm16_thunk_attr_offset: u16;
    static csm_rm16_gdt_offset: u16;
    static csm_rm16_gdtr_base_offset: u16;
    static csm_rm16_transition_offset: u16;
}

unsafe extern "sysv64" {
    /// Transfers control to the 16-bit entry point described by `regs`
    /// through the prepared trampoline at `buffer`, and returns the pointer
    /// to the post-call register save area on the real-mode stack.
    ///
    /// # Safety
    ///
    /// `buffer` must be a prepared, identity-mapped trampoline below 1 MiB;
    /// `regs` must describe a valid real-mode CS:EIP and SS:ESP. See
    /// [`ThunkContext::invoke`](crate::ThunkContext::invoke) for the full
    /// contract; this symbol must only be called through it.
    pub(crate) fn csm_thunk16_transfer(
        regs: *mut RegisterSet,
        buffer: *mut u8,
    ) -> *mut RegisterSet;
}

/// Byte offsets of the trampoline image's patch slots, as resolved by the
/// assembler. Separated from the raw symbols so patching logic can be
/// exercised against synthetic images in tests.
#[derive(Debug, Clone, Copy)]
pub struct ImageLayout {
    /// Total image size in bytes.
    pub size: usize,
    /// Offset of the attribute dword.
    pub thunk_attr: usize,
    /// Offset of the mini-GDT (four 8-byte slots).
    pub gdt: usize,
    /// Offset of the GDT-base-register quadword.
    pub gdtr_base: usize,
    /// Offset of the transition entry-point slot (dword offset + word
    /// selector).
    pub transition: usize,
}

impl ImageLayout {
    /// Offset of the 16-bit code segment descriptor within the image.
    #[must_use]
    pub const fn code_descriptor(&self) -> usize {
        self.gdt + 8
    }

    /// Offset of the 16-bit data segment descriptor within the image.
    #[must_use]
    pub const fn data_descriptor(&self) -> usize {
        self.gdt + 16
    }

    /// The layout of the image assembled into this binary.
    #[must_use]
    pub fn native() -> Self {
        // SAFETY: the statics are assembler-resolved constants in .rodata.
        unsafe {
            Self {
                size: usize::from(csm_rm16_size),
                thunk_attr: usize::from(csm_rm16_thunk_attr_offset),
                gdt: usize::from(csm_rm16_gdt_offset),
                gdtr_base: usize::from(csm_rm16_gdtr_base_offset),
                transition: usize::from(csm_rm16_transition_offset),
            }
        }
    }
}

/// The position-independent trampoline image as assembled into this binary.
#[must_use]
pub fn image_bytes() -> &'static [u8] {
    // SAFETY: csm_rm16_start..+csm_rm16_size delimit the assembled image.
    unsafe { core::slice::from_raw_parts(&raw const csm_rm16_start, usize::from(csm_rm16_size)) }
}
